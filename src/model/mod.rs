mod prompt;
mod template;
mod workflow;

pub use prompt::{ExecutionRecord, InputValue, PromptMeta, PromptNode, parse_node_id, prompt_from_value, validate_references};
pub use template::{Element, ElementType, Template};
pub use workflow::{InputPort, Link, LinkId, NodeId, OutputPort, WorkflowGraph, WorkflowNode};
