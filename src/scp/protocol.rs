// SCP 行协议
//
// 控制字节：0x00 确认，0x01 警告，0x02 致命错误（其后为一行错误信息）。
// 控制行：'T' 时间信息，'C' 文件头 "Cmmmm <length> <name>\n"。

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use super::error::ScpError;

pub const ACK: u8 = 0x00;
pub const WARNING: u8 = 0x01;
pub const FATAL: u8 = 0x02;

/// 上传时使用的默认权限
pub const DEFAULT_FILE_MODE: u32 = 0o644;

/// 'C' 控制行描述的单个文件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub mode: u32,
    /// 文件字节数
    pub length: u64,
    pub file_name: String,
}

/// 解析 'C' 控制行（不含前导 'C' 与行尾换行）
///
/// 最短形式为 "xxxx y z"：4 位八进制权限、长度、文件名，以单个空格分隔。
pub fn parse_c_line(line: &str) -> Result<FileHeader, ScpError> {
    let malformed = |detail: &str| ScpError::MalformedControlLine(detail.to_string());
    let bytes = line.as_bytes();

    if bytes.len() < 8 {
        return Err(malformed("line too short"));
    }
    if !bytes[..4].iter().all(|b| (b'0'..=b'7').contains(b)) {
        return Err(malformed("invalid file mode"));
    }
    if bytes[4] != b' ' || bytes[5] == b' ' {
        return Err(malformed("bad field separator"));
    }
    let separator = line[5..]
        .find(' ')
        .map(|i| i + 5)
        .ok_or_else(|| malformed("missing file name"))?;

    let length = &line[5..separator];
    let file_name = &line[separator + 1..];
    if file_name.is_empty() {
        return Err(malformed("missing file name"));
    }

    let length: i64 = length
        .parse()
        .map_err(|_| malformed("cannot parse file length"))?;
    if length < 0 {
        return Err(malformed("illegal file length"));
    }

    let mode = u32::from_str_radix(&line[..4], 8).map_err(|_| malformed("invalid file mode"))?;
    Ok(FileHeader {
        mode,
        length: length as u64,
        file_name: file_name.to_string(),
    })
}

/// 文件名必须非空且不含换行
pub fn check_file_name(file_name: &str) -> Result<(), ScpError> {
    if file_name.is_empty() || file_name.contains('\n') {
        return Err(ScpError::InvalidFileName(file_name.to_string()));
    }
    Ok(())
}

/// 生成 'C' 控制行（含换行）
pub fn format_c_line(mode: u32, length: u64, file_name: &str) -> Result<String, ScpError> {
    check_file_name(file_name)?;
    Ok(format!("C{:04o} {} {}\n", mode & 0o7777, length, file_name))
}

/// 读取一行（去掉行尾换行），远端出错时信息可能不完整
async fn read_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<String, ScpError> {
    let mut line = Vec::new();
    reader.read_until(b'\n', &mut line).await?;
    if line.last() == Some(&b'\n') {
        line.pop();
    }
    Ok(String::from_utf8_lossy(&line).into_owned())
}

async fn read_code<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<u8, ScpError> {
    match reader.read_u8().await {
        Ok(code) => Ok(code),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(ScpError::RemoteTerminated),
        Err(e) => Err(ScpError::Io(e)),
    }
}

/// 读取文件头，跳过 'T' 行
pub async fn read_header<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<FileHeader, ScpError> {
    loop {
        let code = read_code(reader).await?;
        let line = read_line(reader).await?;
        match code {
            WARNING | FATAL => return Err(ScpError::Remote(line)),
            b'T' => continue,
            b'C' => return parse_c_line(&line),
            other => {
                return Err(ScpError::UnexpectedResponse(format!(
                    "{}{}",
                    other as char, line
                )))
            }
        }
    }
}

/// 等待一个确认字节
pub async fn read_ack<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<(), ScpError> {
    match read_code(reader).await? {
        ACK => Ok(()),
        WARNING | FATAL => Err(ScpError::Remote(read_line(reader).await?)),
        other => {
            let line = read_line(reader).await?;
            Err(ScpError::UnexpectedResponse(format!(
                "{}{}",
                other as char, line
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_c_line() {
        let header = parse_c_line("0644 1234 report.txt").unwrap();
        assert_eq!(header.length, 1234);
        assert_eq!(header.file_name, "report.txt");
        assert_eq!(header.mode, 0o644);

        let header = parse_c_line("0600 0 with space.txt").unwrap();
        assert_eq!(header.length, 0);
        assert_eq!(header.file_name, "with space.txt");
    }

    #[test]
    fn test_parse_c_line_rejects_malformed() {
        for line in [
            "0644 1234",
            "abcd 1234 x",
            "0644  12 x",
            "06441234 x",
            "0644 12x4 name",
            "0644 -12 name",
            "0644 12 ",
            "",
        ] {
            assert!(
                matches!(parse_c_line(line), Err(ScpError::MalformedControlLine(_))),
                "{:?} should be rejected",
                line
            );
        }
    }

    #[test]
    fn test_format_c_line() {
        assert_eq!(format_c_line(0o644, 5, "a b").unwrap(), "C0644 5 a b\n");
        let line = format_c_line(0o100755, 9, "x").unwrap();
        assert_eq!(parse_c_line(&line[1..line.len() - 1]).unwrap().mode, 0o755);
    }

    #[test]
    fn test_format_c_line_rejects_newline() {
        assert!(matches!(
            format_c_line(0o644, 1, "evil\nC0644 1 other"),
            Err(ScpError::InvalidFileName(_))
        ));
        assert!(matches!(
            format_c_line(0o644, 1, ""),
            Err(ScpError::InvalidFileName(_))
        ));
    }

    #[tokio::test]
    async fn test_read_header_skips_time_line() {
        let mut input: &[u8] = b"T1700000000 0 1700000000 0\nC0644 3 a.txt\nabc";
        let header = read_header(&mut input).await.unwrap();
        assert_eq!(header.file_name, "a.txt");
        assert_eq!(input, b"abc");
    }

    #[tokio::test]
    async fn test_remote_errors() {
        let mut input: &[u8] = b"\x01scp: /nope: No such file or directory\n";
        let err = read_header(&mut input).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Remote SCP error: scp: /nope: No such file or directory"
        );

        let mut input: &[u8] = b"";
        assert!(matches!(
            read_ack(&mut input).await,
            Err(ScpError::RemoteTerminated)
        ));

        let mut input: &[u8] = b"\x02fatal\n";
        assert!(matches!(read_ack(&mut input).await, Err(ScpError::Remote(m)) if m == "fatal"));
    }
}
