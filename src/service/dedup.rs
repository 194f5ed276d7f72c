use sha2::{Digest, Sha256};

use crate::models::NewImport;

/// 报文内容哈希: 对原始字节做 SHA-256, 十六进制小写
pub fn content_hash(payload: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload);
    hex::encode(hasher.finalize())
}

/// 原始报文的审计副本; 非 JSON 报文按文本保存
pub fn audit_copy(payload: &[u8]) -> serde_json::Value {
    serde_json::from_slice(payload)
        .unwrap_or_else(|_| serde_json::Value::String(String::from_utf8_lossy(payload).into_owned()))
}

/// 构造去重闸门的插入请求
pub fn new_import(
    company_id: i64,
    period: &str,
    payload: &[u8],
    file_name: Option<String>,
    actor: &str,
) -> NewImport {
    NewImport {
        company_id,
        period: period.to_string(),
        file_name,
        content_hash: content_hash(payload),
        imported_by: actor.to_string(),
        raw_document: audit_copy(payload),
    }
}
