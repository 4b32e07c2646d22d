//! 公共工具模块

pub mod auth;

/// 安全地截断 UTF-8 字符串，确保不会在多字节字符中间截断
///
/// 返回不超过 `max_bytes` 字节的最长有效 UTF-8 子串
pub fn truncate_str_safe(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }

    // 从 max_bytes 位置向前查找有效的字符边界
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }

    &s[..end]
}

/// 安全地截断字符串并添加省略号后缀
pub fn truncate_with_ellipsis(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }

    // 为省略号预留空间
    let truncate_at = if max_bytes > 3 { max_bytes - 3 } else { max_bytes };
    let truncated = truncate_str_safe(s, truncate_at);
    format!("{}...", truncated)
}

/// 将任意名称转换为 snake_case（`GamePlayer` / `game-player` -> `game_player`）
pub fn to_snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev_lower_or_digit = false;
    for ch in name.trim().chars() {
        if ch == '-' || ch == ' ' || ch == '_' {
            if !out.ends_with('_') && !out.is_empty() {
                out.push('_');
            }
            prev_lower_or_digit = false;
        } else if ch.is_uppercase() {
            if prev_lower_or_digit && !out.ends_with('_') {
                out.push('_');
            }
            out.extend(ch.to_lowercase());
            prev_lower_or_digit = false;
        } else {
            out.push(ch);
            prev_lower_or_digit = ch.is_lowercase() || ch.is_ascii_digit();
        }
    }
    out.trim_matches('_').to_string()
}

/// 将任意名称转换为 PascalCase（`game_player` -> `GamePlayer`）
pub fn to_pascal_case(name: &str) -> String {
    to_snake_case(name)
        .split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}

/// 生成指定字节数的随机十六进制字符串
pub fn random_hex(bytes: usize) -> String {
    let buf: Vec<u8> = (0..bytes).map(|_| fastrand::u8(..)).collect();
    hex::encode(buf)
}

/// 解码 `application/x-www-form-urlencoded` 分量（`+` 视为空格）
pub fn decode_form_component(s: &str) -> String {
    let plus_decoded = s.replace('+', " ");
    urlencoding::decode(&plus_decoded)
        .map(|c| c.into_owned())
        .unwrap_or(plus_decoded)
}

/// 解析 urlencoded 文本为有序键值对（保留重复键）
pub fn parse_urlencoded(input: &str) -> Vec<(String, String)> {
    input
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            (decode_form_component(k), decode_form_component(v))
        })
        .collect()
}

/// HTML 转义（表单渲染、调试工具条使用）
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_multibyte_boundary() {
        let s = "你好世界";
        // 每个汉字 3 字节，4 字节处不是字符边界
        assert_eq!(truncate_str_safe(s, 4), "你");
        assert_eq!(truncate_with_ellipsis("abcdefgh", 6), "abc...");
        assert_eq!(truncate_with_ellipsis("abc", 6), "abc");
    }

    #[test]
    fn test_case_conversion() {
        assert_eq!(to_snake_case("GamePlayer"), "game_player");
        assert_eq!(to_snake_case("game-player"), "game_player");
        assert_eq!(to_snake_case("HTTPServer2"), "httpserver2");
        assert_eq!(to_pascal_case("game_player"), "GamePlayer");
        assert_eq!(to_pascal_case("GamePlayer"), "GamePlayer");
    }

    #[test]
    fn test_random_hex_length() {
        let token = random_hex(6);
        assert_eq!(token.len(), 12);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_parse_urlencoded() {
        let pairs = parse_urlencoded("a=1&tags=x&tags=y+z&msg=%E4%BD%A0%21&flag");
        assert_eq!(pairs[1], ("tags".to_string(), "x".to_string()));
        assert_eq!(pairs[2].1, "y z");
        assert_eq!(pairs[3].1, "你!");
        assert_eq!(pairs[4], ("flag".to_string(), String::new()));
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(
            escape_html("<a href=\"x\">'&'</a>"),
            "&lt;a href=&quot;x&quot;&gt;&#x27;&amp;&#x27;&lt;/a&gt;"
        );
    }
}
