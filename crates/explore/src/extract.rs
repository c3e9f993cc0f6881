use factorlab_core::{Error, Result, Variant};
use serde::Deserialize;

/// Pull code out of an AI reply: a python fence first, then any fence,
/// else the whole reply.
pub fn extract_code(response: &str) -> String {
    for marker in ["```python", "```py"] {
        if let Some(start) = response.find(marker) {
            let after = start + marker.len();
            if let Some(end) = response[after..].find("```") {
                return response[after..after + end].trim().to_string();
            }
        }
    }

    if let Some(body) = generic_fence(response) {
        return body.trim().to_string();
    }

    response.trim().to_string()
}

/// Body of the first ``` fence, skipping its info string.
fn generic_fence(response: &str) -> Option<&str> {
    let start = response.find("```")?;
    let after = start + 3;
    let content_start = response[after..]
        .find('\n')
        .map(|i| after + i + 1)
        .unwrap_or(after);
    let end = response[content_start..].find("```")?;
    Some(&response[content_start..content_start + end])
}

#[derive(Deserialize)]
struct VariantsEnvelope {
    variants: Vec<Variant>,
}

/// Decode the `{"variants": [...]}` reply of the exploration prompt.
///
/// Tries a ```json block, then the whole body, then the outermost `{...}`
/// span. Exactly `expected` variants, each with code, are required.
pub fn parse_variants(response: &str, expected: usize) -> Result<Vec<Variant>> {
    let mut candidates: Vec<&str> = Vec::new();
    if let Some(start) = response.find("```json") {
        let after = start + "```json".len();
        if let Some(end) = response[after..].find("```") {
            candidates.push(&response[after..after + end]);
        }
    }
    candidates.push(response);
    if let (Some(open), Some(close)) = (response.find('{'), response.rfind('}')) {
        if open < close {
            candidates.push(&response[open..=close]);
        }
    }

    let mut last_err = String::from("no JSON object found");
    for raw in candidates {
        match serde_json::from_str::<VariantsEnvelope>(raw.trim()) {
            Ok(envelope) => return check_variants(envelope.variants, expected),
            Err(e) => last_err = e.to_string(),
        }
    }
    Err(Error::Validation(format!("AI响应解析失败: {}", last_err)))
}

fn check_variants(variants: Vec<Variant>, expected: usize) -> Result<Vec<Variant>> {
    if variants.len() != expected {
        return Err(Error::Validation(format!(
            "AI返回格式不正确: expected {} variants, got {}",
            expected,
            variants.len()
        )));
    }
    if let Some(i) = variants.iter().position(|v| v.code.trim().is_empty()) {
        return Err(Error::Validation(format!("AI返回格式不正确: variant {} has no code", i)));
    }
    Ok(variants)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_python_fence() {
        let resp = "修复如下：\n```python\ndef calculate_factor(code, date):\n    return {}, {}\n```\n说明...";
        assert_eq!(extract_code(resp), "def calculate_factor(code, date):\n    return {}, {}");
    }

    #[test]
    fn test_extract_generic_fence_and_plain() {
        assert_eq!(extract_code("```\nx = 1\n```"), "x = 1");
        assert_eq!(extract_code("```text\ny = 2\n```"), "y = 2");
        assert_eq!(extract_code("  z = 3\n"), "z = 3");
        // Unterminated fence falls through to the raw text
        assert_eq!(extract_code("```python\nw = 4"), "```python\nw = 4");
    }

    fn body(n: usize) -> String {
        let vs: Vec<String> = (0..n)
            .map(|i| format!(r#"{{"name":"方案{i}","description":"d","pseudocode":"p","code":"c{i}"}}"#))
            .collect();
        format!(r#"{{"variants":[{}]}}"#, vs.join(","))
    }

    #[test]
    fn test_parse_variants_json_block() {
        let resp = format!("好的：\n```json\n{}\n```", body(3));
        let vs = parse_variants(&resp, 3).unwrap();
        assert_eq!(vs[2].code, "c2");
    }

    #[test]
    fn test_parse_variants_bare_and_embedded() {
        assert_eq!(parse_variants(&body(3), 3).unwrap().len(), 3);
        let resp = format!("以下为方案 {} 以上", body(3));
        assert_eq!(parse_variants(&resp, 3).unwrap()[0].name, "方案0");
    }

    #[test]
    fn test_parse_variants_count_and_code_checked() {
        assert!(matches!(parse_variants(&body(2), 3), Err(Error::Validation(_))));
        let missing = r#"{"variants":[{"name":"a","code":""}]}"#;
        assert!(matches!(parse_variants(missing, 1), Err(Error::Validation(_))));
        assert!(parse_variants("not json at all", 3).is_err());
    }
}
