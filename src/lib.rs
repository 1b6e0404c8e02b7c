pub mod context;
pub mod dom;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod host;
pub(crate) mod parser;
pub(crate) mod scanner;
pub mod token;
pub mod view;
pub mod writer;

pub use context::Context;
pub use error::TplError;
pub use token::Token;
pub use view::serializer::to_value;
pub use view::value::{Map, NativeFn, Value};
pub use writer::Writer;
