use std::collections::HashMap;

use evalexpr::{build_operator_tree, ContextWithMutableVariables, HashMapContext, Node, Value};

use crate::errors::FormulaError;

/// A portfolio formula compiled once and evaluated per bar field with each
/// symbol bound as a float variable. Unknown identifiers are not checked at
/// compile time; referencing a symbol outside the variable map fails the
/// evaluation instead.
#[derive(Debug, Clone)]
pub struct Formula {
    source_text: String,
    program: Node,
}

impl Formula {
    pub fn compile(source_text: &str) -> Result<Self, FormulaError> {
        let program = build_operator_tree(source_text).map_err(|source| FormulaError::Compile {
            source_text: source_text.to_string(),
            source,
        })?;
        Ok(Self {
            source_text: source_text.to_string(),
            program,
        })
    }

    pub fn source_text(&self) -> &str {
        &self.source_text
    }

    pub fn eval(&self, variables: &HashMap<String, f64>) -> Result<f64, FormulaError> {
        let mut context = HashMapContext::new();
        for (name, value) in variables {
            context
                .set_value(name.clone(), Value::Float(*value))
                .map_err(FormulaError::Eval)?;
        }

        let result = self.program.eval_with_context(&context).map_err(FormulaError::Eval)?;
        result
            .as_number()
            .map_err(|_| FormulaError::NotNumeric(format!("{result:?}")))
    }
}
