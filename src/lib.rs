// sshlink - SSH 远程控制核心
//
// 单个活动 SSH 连接的管理、远程命令执行、SCP 文件传输，
// 以及基于 shell 命令的远程文件系统。

pub mod fs;
pub mod models;
pub mod scp;
pub mod services;
pub mod ssh;
pub mod utils;
