mod bus;
mod consumer;
mod errors;
mod logging;
mod manager;
mod models;

pub mod subjects;

pub use bus::*;
pub use consumer::*;
pub use errors::*;
pub use logging::*;
pub use manager::*;
pub use models::*;

pub mod prelude {
    pub use crate::bus::*;
    pub use crate::consumer::*;
    pub use crate::errors::*;
    pub use crate::logging::*;
    pub use crate::manager::*;
    pub use crate::models::*;
    pub use crate::subjects;
}
