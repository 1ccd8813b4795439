//! Turning definition documents into element graphs

use crate::{ProcessGraph, ProcessResult, ValidationError};

/// Parses raw definition bytes into a validated [`ProcessGraph`]
pub trait DefinitionParser: Send + Sync {
    fn parse(&self, raw: &[u8]) -> ProcessResult<ProcessGraph>;
}

/// Reads the graph from its JSON form
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonDefinitionParser;

impl DefinitionParser for JsonDefinitionParser {
    fn parse(&self, raw: &[u8]) -> ProcessResult<ProcessGraph> {
        let graph: ProcessGraph = serde_json::from_slice(raw)
            .map_err(|e| ValidationError::InvalidDefinition(e.to_string()))?;
        graph.validate()?;
        Ok(graph)
    }
}
