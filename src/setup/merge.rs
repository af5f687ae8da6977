//! Recursive merge of JSON values; overrides win at every level.

use serde_json::Value;

/// Merge `src` into `dest`. Objects merge key by key, recursively; any
/// other kind of value in `src` replaces the destination outright.
pub fn deep_merge(dest: &mut Value, src: &Value) {
    match (dest, src) {
        (Value::Object(dest_map), Value::Object(src_map)) => {
            for (key, src_value) in src_map {
                match dest_map.get_mut(key) {
                    Some(dest_value) => deep_merge(dest_value, src_value),
                    None => {
                        dest_map.insert(key.clone(), src_value.clone());
                    }
                }
            }
        }
        (dest, src) => *dest = src.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_nested_objects_merge() {
        let mut dest = json!({"a": {"x": 1, "y": 2}, "b": 3});
        deep_merge(&mut dest, &json!({"a": {"y": 20, "z": 30}}));
        assert_eq!(dest, json!({"a": {"x": 1, "y": 20, "z": 30}, "b": 3}));
    }

    #[test]
    fn test_arrays_are_replaced_not_merged() {
        let mut dest = json!({"list": [1, 2, 3]});
        deep_merge(&mut dest, &json!({"list": [9]}));
        assert_eq!(dest, json!({"list": [9]}));
    }

    #[test]
    fn test_scalar_replaces_object() {
        let mut dest = json!({"a": {"x": 1}});
        deep_merge(&mut dest, &json!({"a": 5}));
        assert_eq!(dest, json!({"a": 5}));
    }
}
