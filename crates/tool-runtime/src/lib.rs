pub mod factory;
pub mod params;
pub mod registry;
pub mod tool;
pub mod tools;

pub use factory::{FactoryTable, ToolConstructor, ToolMeta, ToolSpec};
pub use params::ParamSpec;
pub use registry::{LoadFailure, LoadPolicy, LoadReport, RegistryError, ToolRegistry};
pub use tool::{FunctionDeclaration, Tool, ToolBinding, ToolError, ToolOutcome, ToolsetConnection};
pub use tools::{EmbeddingProvider, QueryBackend, QueryRequest, QueryResult};
