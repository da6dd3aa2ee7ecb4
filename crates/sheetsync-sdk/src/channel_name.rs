//! 频道标识解析：由一组实体 ID 派生稳定的频道名
//!
//! 同一集合（与顺序、重复无关）总是得到同一名字。哈希不是加密哈希，
//! 碰撞的后果最多是进程内一次错误路由的订阅，不构成安全边界。

use regex::Regex;
use std::collections::BTreeSet;
use std::sync::OnceLock;

/// 默认命名空间前缀
pub const DEFAULT_CHANNEL_NAMESPACE: &str = "rt-chars";

const ID_DELIMITER: char = ',';

/// 派生频道名：`<namespace>-<base36(hash)>`
///
/// 排序、以逗号连接后做 `h = h * 31 + code_point` 滚动哈希（64 位回绕）。
pub fn resolve_channel_name<I, S>(namespace: &str, ids: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let joined = canonical_ids(ids).join(&ID_DELIMITER.to_string());
    let hash = joined
        .chars()
        .fold(0u64, |h, c| h.wrapping_mul(31).wrapping_add(c as u64));
    format!("{}-{}", namespace, to_base36(hash))
}

/// 后端行过滤条件（PostgREST 语法）：`id=in.(a,b,c)`
pub fn channel_filter<I, S>(ids: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    format!("id=in.({})", canonical_ids(ids).join(&ID_DELIMITER.to_string()))
}

/// 去重并按字典序排序
pub fn canonical_ids<I, S>(ids: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    ids.into_iter()
        .map(|id| id.as_ref().to_string())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// ID 能否安全放进过滤条件（不能含逗号、括号等分隔符）
pub fn is_valid_identifier(id: &str) -> bool {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]{1,64}$").ok())
        .as_ref()
        .map_or(false, |pattern| pattern.is_match(id))
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::with_capacity(13);
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}
