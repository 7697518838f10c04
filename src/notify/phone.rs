/// Rewrite a raw phone value into `+`-prefixed international form.
///
/// Numbers already starting with `+` are kept. Anything else is treated as
/// a national number under `country_code`: its first character (the trunk
/// prefix, `0` in `0821234567`) is replaced by `+<country_code>`.
/// Returns `None` for blank input.
pub fn normalize_phone(raw: &str, country_code: &str) -> Option<String> {
    let phone = raw.trim();
    if phone.is_empty() {
        return None;
    }
    if phone.starts_with('+') {
        return Some(phone.to_string());
    }
    let mut chars = phone.chars();
    chars.next();
    Some(format!("+{country_code}{}", chars.as_str()))
}
