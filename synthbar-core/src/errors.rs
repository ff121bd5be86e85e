use thiserror::Error;

#[derive(Error, Debug)]
pub enum BusError {
    #[error("failed to connect to bus: {0}")]
    Connect(#[from] async_nats::ConnectError),

    #[error("failed to publish to bus: {0}")]
    Publish(#[from] async_nats::PublishError),

    #[error("failed to subscribe on bus: {0}")]
    Subscribe(#[from] async_nats::SubscribeError),

    #[error("failed to drain subscription: {0}")]
    Drain(String),
}

#[derive(Error, Debug)]
pub enum ManagerError {
    #[error("unit with id already exists: {0}")]
    AlreadyExists(String),

    #[error("failed to spawn unit {id}: {source}")]
    Spawn {
        id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to stop unit {id}: {source}")]
    Stop {
        id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to stop {} unit(s)", .0.len())]
    StopAll(Vec<ManagerError>),
}
