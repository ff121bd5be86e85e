use thiserror::Error;

#[derive(Error, Debug)]
pub enum FormulaError {
    #[error("failed to compile formula {source_text:?}: {source}")]
    Compile {
        source_text: String,
        #[source]
        source: evalexpr::EvalexprError,
    },

    #[error("failed to evaluate formula: {0}")]
    Eval(#[source] evalexpr::EvalexprError),

    #[error("formula result is not numeric: {0}")]
    NotNumeric(String),
}

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error(transparent)]
    Formula(#[from] FormulaError),
}
