// 远程文件系统模块
//
// 模块结构:
// - path: 远程路径 (RemotePath)
// - mime: MIME 类型 (MimeType)
// - file: 文件条目 (RemoteFile, XdgUserDir)
// - listing: ls 输出解析
// - filesystem: 基于 shell 命令与 SCP 的文件系统 (RemoteFileSystem)

pub mod file;
pub mod filesystem;
pub mod listing;
pub mod mime;
pub mod path;

pub use file::{RemoteFile, XdgUserDir};
pub use filesystem::RemoteFileSystem;
pub use mime::MimeType;
pub use path::RemotePath;
