// 服务模块
//
// - storage: 设置与主机的本地持久化
// - files: 远程文件浏览 (FileManager)
// - probe: 远程环境探测

pub mod files;
pub mod probe;
pub mod storage;

pub use files::FileManager;
pub use storage::HostStore;
