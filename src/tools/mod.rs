//! 工具箱：注册表、schema 校验、执行器与内置工具

pub mod echo;
pub mod executor;
pub mod fetch;
pub mod filesystem;
pub mod kind;
pub mod policy;
pub mod registry;
pub mod schema;
pub mod shell;

pub use echo::EchoTool;
pub use executor::{truncate_output, ToolExecutor, ToolInvocation, ToolOutcome};
pub use fetch::FetchTool;
pub use filesystem::{DeleteFileTool, DirEntry, ListFilesTool, ReadFileTool, SafeFs, WriteFileTool};
pub use kind::{ToolCatalog, ToolKind};
pub use policy::SafetyPolicy;
pub use registry::{Tool, ToolRegistry, ToolSpec};
pub use schema::{parse_args, schema_of, validate_args};
pub use shell::ShellTool;
