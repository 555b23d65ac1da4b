//! ログ出力用のJSONマスキング
//!
//! ドット区切りのパスで指定したフィールドを取り除いたコピーを返す。
//! パス途中に配列があれば各要素に適用する。存在しないパスは無視する。

use serde_json::Value;

/// 指定パスのフィールドを除去したコピーを作成
pub fn redact(value: &Value, paths: &[&str]) -> Value {
    let mut copy = value.clone();
    for path in paths {
        let segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
        remove_path(&mut copy, &segments);
    }
    copy
}

fn remove_path(value: &mut Value, segments: &[&str]) {
    let Some((head, rest)) = segments.split_first() else {
        return;
    };

    match value {
        Value::Array(elements) => {
            for element in elements {
                remove_path(element, segments);
            }
        }
        Value::Object(map) => {
            if rest.is_empty() {
                map.remove(*head);
            } else if let Some(child) = map.get_mut(*head) {
                remove_path(child, rest);
            }
        }
        _ => {}
    }
}
