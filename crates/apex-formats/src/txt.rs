//! String harvesting from text blobs
//!
//! String lookup lists are JSON objects of the form
//! `{"0": ["a", ...], "1": ["b", ...]}`; every listed string is a candidate
//! path. Other text yields its non-empty lines.

use serde_json::Value;

/// Candidate strings found in a text blob
pub fn harvest_strings(data: &[u8]) -> Vec<Vec<u8>> {
    if let Ok(Value::Object(map)) = serde_json::from_slice::<Value>(data)
        && map.contains_key("0")
        && map.contains_key("1")
    {
        return map
            .values()
            .filter_map(Value::as_array)
            .flatten()
            .filter_map(Value::as_str)
            .map(|s| s.as_bytes().to_vec())
            .collect();
    }

    data.split(|&b| b == b'\n')
        .map(<[u8]>::trim_ascii)
        .filter(|line| !line.is_empty())
        .map(<[u8]>::to_vec)
        .collect()
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_string_lookup_list() {
        let data = br#"{"0": ["foo/bar.txt", "a.bin"], "1": ["c.xml", 5]}"#;
        let mut got = harvest_strings(data);
        got.sort();
        assert_eq!(
            got,
            vec![b"a.bin".to_vec(), b"c.xml".to_vec(), b"foo/bar.txt".to_vec()]
        );
    }

    #[test]
    fn test_other_json_falls_back_to_lines() {
        let data = b"{\"0\": [\"x\"]}";
        assert_eq!(harvest_strings(data), vec![data.to_vec()]);
    }

    #[test]
    fn test_plain_lines() {
        let data = b"first/path.dds\r\n\n  second.bin  \nthird";
        assert_eq!(
            harvest_strings(data),
            vec![b"first/path.dds".to_vec(), b"second.bin".to_vec(), b"third".to_vec()]
        );
    }
}
