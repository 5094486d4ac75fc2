use std::borrow::Cow;

/// Normalise a remote column name: `in.county` -> `in_county`, `Field Name` -> `field_name`.
pub fn normalize_column_name(name: &str) -> String {
    name.trim().replace(['.', ' '], "_").to_lowercase()
}

/// Quote an SQL identifier so reserved words, spaces and brackets survive.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Stable 64-bit FNV-1a hash; used to turn a simulation id into a reproducible seed.
pub fn stable_seed(text: &str) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    text.bytes().fold(OFFSET, |hash, b| (hash ^ u64::from(b)).wrapping_mul(PRIME))
}

/// UTF-8 when valid, otherwise Windows-1252 (the encoding DDY files ship in).
pub fn decode_text(bytes: &[u8]) -> Cow<'_, str> {
    match std::str::from_utf8(bytes) {
        Ok(s) => Cow::Borrowed(s),
        Err(_) => encoding_rs::WINDOWS_1252.decode_without_bom_handling(bytes).0,
    }
}

/// Extract the `href` target of the first anchor in an HTML fragment.
pub fn extract_href(html: &str) -> Option<String> {
    let start = html.find("href=")? + "href=".len();
    let rest = &html[start..];
    let quote = rest.chars().next()?;
    if quote == '"' || quote == '\'' {
        let body = &rest[1..];
        body.find(quote).map(|end| body[..end].to_string())
    } else {
        let end = rest.find(|c: char| c.is_whitespace() || c == '>').unwrap_or(rest.len());
        Some(rest[..end].to_string())
    }
}

/// Render a coordinate in shortest round-trip form so `"34.0"`, `34` and `34.00` compare equal.
pub fn canonical_coordinate(raw: &str) -> Option<String> {
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite()).map(|v| v.to_string())
}

/// Leading number of a metadata size field such as `"4.0 kWDC"`; `None`/blank yield `None`.
pub fn leading_number(raw: &str) -> Option<f64> {
    raw.split_whitespace().next().and_then(|token| token.parse::<f64>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_remote_column_names() {
        assert_eq!(normalize_column_name("in.county"), "in_county");
        assert_eq!(normalize_column_name("Field Location"), "field_location");
        assert_eq!(normalize_column_name("out.electricity.total.energy_consumption"), "out_electricity_total_energy_consumption");
    }

    #[test]
    fn quotes_identifiers_with_brackets_and_quotes() {
        assert_eq!(quote_ident("Indoor Temperature [C]"), "\"Indoor Temperature [C]\"");
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
    }

    #[test]
    fn seed_is_stable() {
        assert_eq!(stable_seed("resstock_tmy3_2021_release_1_100_0"), stable_seed("resstock_tmy3_2021_release_1_100_0"));
        assert_ne!(stable_seed("a"), stable_seed("b"));
        assert_eq!(stable_seed(""), 0xcbf2_9ce4_8422_2325);
    }

    #[test]
    fn decodes_windows_1252_fallback() {
        assert_eq!(decode_text(&[b'2', b'0', 0xB0, b'C']), "20°C");
        assert_eq!(decode_text(&[0x80, b' ', b'5', 0x96, b'6']), "€ 5–6");
        assert_eq!(decode_text("plain".as_bytes()), "plain");
    }

    #[test]
    fn extracts_anchor_targets() {
        let html = "<a href=\"https://energyplus-weather.s3.amazonaws.com/x.epw\">Download Weather File</a>";
        assert_eq!(extract_href(html).as_deref(), Some("https://energyplus-weather.s3.amazonaws.com/x.epw"));
        assert_eq!(extract_href("<a href=x.ddy>ddy</a>").as_deref(), Some("x.ddy"));
        assert_eq!(extract_href("no anchor"), None);
    }

    #[test]
    fn canonical_coordinates_compare_numerically() {
        assert_eq!(canonical_coordinate("34.0"), canonical_coordinate("34"));
        assert_eq!(canonical_coordinate("-118.40"), Some("-118.4".to_string()));
        assert_eq!(canonical_coordinate("north"), None);
    }

    #[test]
    fn parses_pv_sizes() {
        assert_eq!(leading_number("4.0 kWDC"), Some(4.0));
        assert_eq!(leading_number("None"), None);
        assert_eq!(leading_number(""), None);
    }
}
