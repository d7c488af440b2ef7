/// Collapse runs of whitespace, trim, and cap the result at `max_chars` characters.
pub fn sanitize_text(text: &str, max_chars: usize) -> String {
    let mut out = String::with_capacity(text.len().min(max_chars * 4));
    for (i, word) in text.split_whitespace().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(word);
    }
    match out.char_indices().nth(max_chars) {
        Some((idx, _)) => {
            out.truncate(idx);
            out.truncate(out.trim_end().len());
            out
        }
        None => out,
    }
}

/// Mask a phone number for logs, keeping the country/area prefix and the last two digits.
pub fn mask_phone(number: &str) -> String {
    let chars: Vec<char> = number.chars().collect();
    if chars.len() <= 6 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 2..].iter().collect();
    format!("{head}{}{tail}", "*".repeat(chars.len() - 6))
}

/// Shorten free text for log lines.
pub fn preview(text: &str, max_chars: usize) -> String {
    let clean = sanitize_text(text, max_chars);
    if text.chars().count() > max_chars {
        format!("{clean}...")
    } else {
        clean
    }
}
