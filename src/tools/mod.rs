//! 工具层：网关抽象、本地注册表、审计执行器与远程 HTTP 网关

pub mod echo;
pub mod executor;
pub mod gateway;
pub mod http;
pub mod recovery;
pub mod registry;

pub use echo::EchoTool;
pub use executor::ToolExecutor;
pub use gateway::{ToolError, ToolGateway};
pub use http::HttpToolGateway;
pub use recovery::RecoveryTool;
pub use registry::{Tool, ToolRegistry};
