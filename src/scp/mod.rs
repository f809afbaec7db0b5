// SCP 文件传输
//
// - protocol: 控制字节与控制行
// - source: 下载（scp -f）
// - sink: 上传（scp -t）

pub mod error;
pub mod protocol;
pub mod sink;
pub mod source;

pub use error::ScpError;
pub use protocol::{FileHeader, DEFAULT_FILE_MODE};
pub use sink::{upload, ScpSink};
pub use source::ScpSource;
