// Shell 转义与 ls 输出解析工具
//
// - escape: 把任意字符串转换为 POSIX shell 的单个字面量参数
// - unescape: 还原 `ls -Q` 输出中的 C 风格转义（含 \NNN 八进制序列）
// - split_by_whitespace: 按空白切分 ls 行，保留带引号的文件名

/// 将字符串转义为 shell 安全的单个参数
///
/// 可打印 ASCII 片段放入单引号；单引号本身写作 `\'`；
/// 其余字节（控制字符、非 ASCII）以 `$'\NNN'` 八进制形式输出。
/// 相邻片段在 shell 中拼接为同一个词，不会发生分词或通配符展开。
pub fn escape(value: &str) -> String {
    if value.is_empty() {
        return "''".to_string();
    }

    #[derive(PartialEq)]
    enum Mode {
        None,
        Plain,
        Ansi,
    }

    let bytes = value.as_bytes();
    let mut result = String::with_capacity(bytes.len() + 2);
    let mut mode = Mode::None;

    for &byte in bytes {
        match byte {
            b'\'' => {
                if mode != Mode::None {
                    result.push('\'');
                }
                result.push_str("\\'");
                mode = Mode::None;
            }
            0x20..=0x7e => {
                if mode != Mode::Plain {
                    if mode == Mode::Ansi {
                        result.push('\'');
                    }
                    result.push('\'');
                    mode = Mode::Plain;
                }
                result.push(byte as char);
            }
            _ => {
                if mode != Mode::Ansi {
                    if mode == Mode::Plain {
                        result.push('\'');
                    }
                    result.push_str("$'");
                    mode = Mode::Ansi;
                }
                result.push_str(&format!("\\{:03o}", byte));
            }
        }
    }

    if mode != Mode::None {
        result.push('\'');
    }
    result
}

/// 还原 ls 输出中的转义序列，返回原始字节
///
/// 支持 `\NNN`（1-3 位八进制）、`\\`、`\"`、`\'`、`\?` 以及
/// `\a \b \t \n \v \f \r`。无法识别的转义原样保留。
pub fn unescape_bytes(value: &str) -> Vec<u8> {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        let byte = bytes[i];
        if byte != b'\\' || i + 1 >= bytes.len() {
            out.push(byte);
            i += 1;
            continue;
        }

        let next = bytes[i + 1];
        match next {
            b'0'..=b'7' => {
                let mut code: u32 = 0;
                let mut len = 0;
                while len < 3 && i + 1 + len < bytes.len() {
                    let digit = bytes[i + 1 + len];
                    if !(b'0'..=b'7').contains(&digit) {
                        break;
                    }
                    code = code * 8 + (digit - b'0') as u32;
                    len += 1;
                }
                out.push((code & 0xff) as u8);
                i += 1 + len;
            }
            b'\\' | b'"' | b'\'' | b'?' => {
                out.push(next);
                i += 2;
            }
            b'a' | b'b' | b't' | b'n' | b'v' | b'f' | b'r' => {
                out.push(match next {
                    b'a' => 0x07,
                    b'b' => 0x08,
                    b't' => b'\t',
                    b'n' => b'\n',
                    b'v' => 0x0b,
                    b'f' => 0x0c,
                    _ => b'\r',
                });
                i += 2;
            }
            _ => {
                out.push(byte);
                i += 1;
            }
        }
    }
    out
}

/// 还原转义序列并按 UTF-8 解码（非法序列用替换字符代替）
pub fn unescape(value: &str) -> String {
    String::from_utf8_lossy(&unescape_bytes(value)).into_owned()
}

/// 去掉首尾成对的双引号
pub fn unquote(value: &str) -> &str {
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        &value[1..value.len() - 1]
    } else {
        value
    }
}

/// 按空白切分一行 ls 输出
///
/// 双引号内的空白不切分，引号内的 `\"` 不结束引用；
/// 引号外被反斜杠转义的空白同样不切分。
pub fn split_by_whitespace(line: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start: Option<usize> = None;
    let mut in_quotes = false;
    let mut escaped = false;

    for (index, ch) in line.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' => {
                start.get_or_insert(index);
                escaped = true;
            }
            '"' => {
                start.get_or_insert(index);
                in_quotes = !in_quotes;
            }
            c if c.is_whitespace() && !in_quotes => {
                if let Some(begin) = start.take() {
                    parts.push(&line[begin..index]);
                }
            }
            _ => {
                start.get_or_insert(index);
            }
        }
    }
    if let Some(begin) = start {
        parts.push(&line[begin..]);
    }
    parts
}
