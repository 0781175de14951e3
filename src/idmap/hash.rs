/// 单个输入最多加盐重哈希的次数
pub const MAX_REHASH: u32 = 16;

/// 由输入派生正的 64 位 ID，salt 为 0 时即原始哈希
pub fn derive(input: &str, salt: u32) -> i64 {
    let digest = if salt == 0 {
        md5::compute(input.as_bytes())
    } else {
        md5::compute(format!("{}#{}", input, salt).as_bytes())
    };

    let mut buf = [0u8; 8];
    buf.copy_from_slice(&digest.0[..8]);
    let id = (u64::from_be_bytes(buf) & i64::MAX as u64) as i64;

    // 0 在 OneBot 中表示"无"
    if id == 0 { 1 } else { id }
}

/// 联合哈希的输入，分隔符不会出现在平台 ID 中
pub fn joint_key(group_id: &str, user_id: &str) -> String {
    format!("{}\u{1f}{}", group_id, user_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_is_pure_and_positive() {
        let a = derive("E3B0C442", 0);
        assert_eq!(a, derive("E3B0C442", 0));
        assert!(a > 0);
    }

    #[test]
    fn salt_changes_result() {
        assert_ne!(derive("user", 0), derive("user", 1));
        assert_ne!(derive("user", 1), derive("user", 2));
    }

    #[test]
    fn joint_key_is_order_sensitive() {
        assert_ne!(
            derive(&joint_key("a", "b"), 0),
            derive(&joint_key("b", "a"), 0)
        );
        assert_ne!(joint_key("ab", "c"), joint_key("a", "bc"));
    }
}
