// ls 输出解析
//
// 目录列表通过 `ls -lQk1` 获取，每行一个条目：
// <权限> <链接数> <所有者> <组> <大小> <日期> <时间> "<名称>" [-> "<目标>"]

use chrono::{Local, NaiveDateTime, TimeZone};

use super::file::RemoteFile;
use super::mime::MimeType;
use super::path::RemotePath;
use crate::utils::escape::{split_by_whitespace, unescape, unquote};

/// 日期时间字段格式（`--time-style=long-iso`）
const DATE_FORMAT: &str = "%Y-%m-%d %H:%M";

/// 有效条目的最少字段数
const MIN_FIELDS: usize = 8;

/// 切分一行 ls 输出，字段不足时返回 None
///
/// 字符/块设备的大小字段为 `主设备号, 次设备号`，这里合并为 0，
/// 保证文件名始终位于第 8 个字段。
pub fn tokenize(line: &str) -> Option<Vec<&str>> {
    let mut parts = split_by_whitespace(line);
    if parts.len() > MIN_FIELDS && parts[4].ends_with(',') {
        parts[4] = "0";
        parts.remove(5);
    }
    if parts.len() < MIN_FIELDS {
        None
    } else {
        Some(parts)
    }
}

/// 解析名称字段（去引号并还原转义）
pub fn parse_name(field: &str) -> String {
    unescape(unquote(field))
}

/// 从 `ls` 输出中提取文件名，跳过空行与 `total` 等无效行
pub fn parse_names(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| tokenize(line).map(|parts| parse_name(parts[7])))
        .collect()
}

/// 把 ls 的日期时间字段转换为 Unix 毫秒，无法解析时返回 0
pub fn parse_mtime(date: &str, time: &str) -> i64 {
    let text = format!("{} {}", date, time);
    NaiveDateTime::parse_from_str(&text, DATE_FORMAT)
        .ok()
        .and_then(|naive| Local.from_local_datetime(&naive).earliest())
        .map(|dt| dt.timestamp_millis())
        .unwrap_or(0)
}

/// 解析一行 `ls -lQk1 --time-style=long-iso` 输出为 RemoteFile
///
/// 字段不足或大小字段不是数字时返回 None
pub fn parse_file(line: &str, parent: &RemotePath) -> Option<RemoteFile> {
    let parts = tokenize(line)?;
    let size = parts[4].parse::<i64>().ok()?;
    let kind = parts[0].chars().next();
    let name = parse_name(parts[7]);
    let path = parent.resolve(&name);

    let symlink_target = if kind == Some('l') {
        parts.get(9).map(|target| parse_name(target))
    } else {
        None
    };

    let mime_type = if kind == Some('d') {
        MimeType::directory()
    } else {
        MimeType::from_file_name(&name).unwrap_or_else(MimeType::unknown)
    };

    Some(RemoteFile {
        path,
        size,
        last_modified: parse_mtime(parts[5], parts[6]),
        owner: parts[2].to_string(),
        symlink_target,
        mime_type,
        xdg_user_dir: None,
    })
}

/// 解析整段 ls 输出，保持原有顺序
pub fn parse_files(output: &str, parent: &RemotePath) -> Vec<RemoteFile> {
    output
        .lines()
        .filter_map(|line| parse_file(line, parent))
        .collect()
}
