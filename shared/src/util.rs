use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds since the Unix epoch, saturating to zero on a skewed clock.
pub fn current_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

pub fn current_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

/// Render a reply template, substituting `{name}` placeholders from `fields`.
/// Unknown placeholders are left untouched. Substituted values are written
/// verbatim and never rescanned.
pub fn render_template(template: &str, fields: &[(&str, &str)]) -> String {
    let mut rendered = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        rendered.push_str(&rest[..open]);
        let tail = &rest[open..];
        let Some(close) = tail[1..].find(['{', '}']).map(|i| i + 1) else {
            rest = tail;
            break;
        };
        if tail.as_bytes()[close] == b'{' {
            // Stray brace; restart at the next opening one.
            rendered.push_str(&tail[..close]);
            rest = &tail[close..];
            continue;
        }
        let name = &tail[1..close];
        match fields.iter().find(|(field, _)| *field == name) {
            Some((_, value)) => rendered.push_str(value),
            None => rendered.push_str(&tail[..=close]),
        }
        rest = &tail[close + 1..];
    }
    rendered.push_str(rest);
    rendered
}
