//! Answer parsing.

use crate::error::StateError;

fn parse_error(message: impl Into<String>) -> StateError {
    StateError::Parse {
        message: message.into(),
    }
}

/// Extract the `final_answer` list from a model answer.
///
/// Finds `final_answer` (case-insensitive, falling back to the start of the
/// text when absent), takes the first `[...]` after it, splits on commas and
/// strips quotes and whitespace. Empty entries are dropped.
///
/// # Errors
///
/// Returns [`StateError::Parse`] if no bracketed list follows the marker.
///
/// # Example
///
/// ```
/// use catalyst_search::prompts::parse_answer;
///
/// let answer = "Reasoning...\nfinal_answer = ['Pt', \"PdAu\", Ni]";
/// assert_eq!(parse_answer(answer).unwrap(), vec!["Pt", "PdAu", "Ni"]);
/// ```
pub fn parse_answer(answer: &str) -> Result<Vec<String>, StateError> {
    let start = answer
        .to_ascii_lowercase()
        .find("final_answer")
        .unwrap_or(0);
    let tail = &answer[start..];
    let open = tail
        .find('[')
        .ok_or_else(|| parse_error("no list found after final_answer"))?;
    let close = tail[open..]
        .find(']')
        .ok_or_else(|| parse_error("unterminated final_answer list"))?;

    Ok(tail[open + 1..open + close]
        .split(',')
        .map(|item| item.replace(['\'', '"'], "").trim().to_string())
        .filter(|item| !item.is_empty())
        .collect())
}

/// Parse a `final_answer` list of energies, in eV, as absolute values.
///
/// # Errors
///
/// Returns [`StateError::Parse`] if the list is missing or empty, or an entry
/// is not a finite number.
pub fn parse_energy_list(answer: &str) -> Result<Vec<f64>, StateError> {
    let items = parse_answer(answer)?;
    if items.is_empty() {
        return Err(parse_error("empty energy list"));
    }
    items
        .iter()
        .map(|item| {
            let number = item.replace("eV", "");
            match number.trim().parse::<f64>() {
                Ok(value) if value.is_finite() => Ok(value.abs()),
                _ => Err(parse_error(format!("not an energy: '{item}'"))),
            }
        })
        .collect()
}

/// Parse a symbols answer into one symbol list per candidate.
///
/// Lines look like `name: [A, B]` or `name: None`. Candidates that are not
/// mentioned, or answered with `None` or an empty list, map to `None`.
/// Symbols are de-duplicated keeping first occurrence order.
#[must_use]
pub fn parse_symbols_answer(answer: &str, candidates: &[String]) -> Vec<Option<Vec<String>>> {
    let entries: Vec<(String, Option<Vec<String>>)> = answer
        .lines()
        .filter_map(|line| {
            let (name, rest) = line.split_once(':')?;
            let name = name
                .trim()
                .trim_start_matches(['-', '*'])
                .replace(['`', '\'', '"'], "")
                .trim()
                .to_string();
            Some((name, parse_symbol_list(rest)))
        })
        .collect();

    candidates
        .iter()
        .map(|candidate| {
            entries
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(candidate.trim()))
                .and_then(|(_, symbols)| symbols.clone())
        })
        .collect()
}

fn parse_symbol_list(text: &str) -> Option<Vec<String>> {
    let text = text.trim().trim_matches('`');
    let open = text.find('[')?;
    let close = text[open..].find(']')? + open;
    let mut symbols: Vec<String> = Vec::new();
    for raw in text[open + 1..close].split(',') {
        let symbol = raw.replace(['\'', '"'], "").trim().to_string();
        if is_element_symbol(&symbol) && !symbols.contains(&symbol) {
            symbols.push(symbol);
        }
    }
    (!symbols.is_empty()).then_some(symbols)
}

fn is_element_symbol(symbol: &str) -> bool {
    let mut chars = symbol.chars();
    match chars.next() {
        Some(first) if first.is_ascii_uppercase() => {
            let rest: Vec<char> = chars.collect();
            rest.len() <= 2 && rest.iter().all(char::is_ascii_lowercase)
        }
        _ => false,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    #[test_case("final_answer: [Pt, Pd, Ni]", &["Pt", "Pd", "Ni"] ; "bare")]
    #[test_case("FINAL_ANSWER = ['Pt', 'Pd']", &["Pt", "Pd"] ; "uppercase quoted")]
    #[test_case("Earlier [x] list\nfinal_answer: [\"Cu\"]", &["Cu"] ; "skips earlier list")]
    #[test_case("final_answer: [Pt, , Pd]", &["Pt", "Pd"] ; "empty entries dropped")]
    #[test_case("[Ru, Rh]", &["Ru", "Rh"] ; "no marker")]
    #[test_case("final_answer: []", &[] ; "empty list")]
    fn test_parse_answer(answer: &str, expected: &[&str]) {
        assert_eq!(parse_answer(answer).unwrap(), expected);
    }

    #[test]
    fn test_parse_answer_without_list() {
        assert!(parse_answer("final_answer: Pt and Pd").is_err());
        assert!(parse_answer("final_answer: [Pt").is_err());
    }

    #[test]
    fn test_parse_energy_list() {
        let energies = parse_energy_list("final_answer: [-1.5 eV, 0.25eV, '-2']").unwrap();
        assert_eq!(energies, vec![1.5, 0.25, 2.0]);
    }

    #[test_case("final_answer: [high, 1.0]" ; "word")]
    #[test_case("final_answer: []" ; "empty")]
    #[test_case("final_answer: [NaN]" ; "nan")]
    #[test_case("no list" ; "missing")]
    fn test_parse_energy_list_errors(answer: &str) {
        assert!(matches!(
            parse_energy_list(answer),
            Err(StateError::Parse { .. })
        ));
    }

    #[test]
    fn test_parse_symbols_answer() {
        let candidates = vec![
            "Platinum".to_string(),
            "PtNi alloy".to_string(),
            "Zeolite".to_string(),
            "Copper".to_string(),
        ];
        let answer = "Platinum: [Pt]\n- PtNi alloy: ['Pt', 'Ni', 'Pt']\nZeolite: None\n";
        let parsed = parse_symbols_answer(answer, &candidates);
        assert_eq!(
            parsed,
            vec![
                Some(vec!["Pt".to_string()]),
                Some(vec!["Pt".to_string(), "Ni".to_string()]),
                None,
                None,
            ]
        );
    }

    #[test]
    fn test_parse_symbols_rejects_non_symbols() {
        let parsed = parse_symbols_answer("Clay: [clay, silicon]", &["Clay".to_string()]);
        assert_eq!(parsed, vec![None]);
    }
}
