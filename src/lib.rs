//! taskfarm 可执行程序的装配层：把存储、调度服务、维护循环和 HTTP 服务组装成一个应用。

pub mod app;
pub mod shutdown;

pub use app::{AppMode, Application};
pub use shutdown::{wait_for_shutdown_signal, ShutdownManager};
