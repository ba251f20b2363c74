//! Codestream marker layer (§4.7): segment definitions, the parser state
//! machine, and the serialiser.

pub mod reader;
pub mod segments;
pub mod writer;
