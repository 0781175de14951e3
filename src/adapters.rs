//! 平台接入。目前只有用于本地调试的控制台适配器。

pub mod console;
