//! Name rendering and matching shared by the modules registry and the
//! breakpoint manager (spec §4.1 "Name matching for function breakpoints").

/// Split a fully-qualified dotted name into components, e.g.
/// `"Ns.Outer.Inner.Method"` → `["Ns", "Outer", "Inner", "Method"]`.
///
/// A component carrying a generic argument list (`Method<T>`) is kept
/// whole; the list itself is not split on its internal dots.
pub fn split_dotted(name: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0usize;
    for (i, c) in name.char_indices() {
        match c {
            '<' => depth += 1,
            '>' => depth -= 1,
            '.' if depth == 0 => {
                parts.push(&name[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&name[start..]);
    parts
}

/// `target` matches `candidate` under the suffix-on-dotted-components rule
/// (spec §4.1): the target `A.B` matches any fully-qualified name whose
/// trailing components equal `[A, B]`.
pub fn suffix_matches_dotted(target: &str, candidate: &str) -> bool {
    let target_parts = split_dotted(target);
    let candidate_parts = split_dotted(candidate);
    if target_parts.len() > candidate_parts.len() {
        return false;
    }
    let offset = candidate_parts.len() - target_parts.len();
    target_parts
        .iter()
        .zip(&candidate_parts[offset..])
        .all(|(t, c)| t == c)
}

/// Render a metadata generic-arity suffix (`` `N ``) together with the
/// generic argument list into display form: `` List`1 `` with args
/// `["int"]` becomes `List<int>` (spec §4.1 "Generic arity … consumes the
/// generic argument list left-to-right when rendering nested type names").
pub fn render_generic_name(raw_name: &str, type_args: &[String]) -> String {
    let Some(tick_pos) = raw_name.rfind('`') else {
        return raw_name.to_string();
    };
    let base = &raw_name[..tick_pos];
    let arity: usize = raw_name[tick_pos + 1..].parse().unwrap_or(0);
    if arity == 0 || type_args.is_empty() {
        return base.to_string();
    }
    let take = arity.min(type_args.len());
    format!("{base}<{}>", type_args[..take].join(","))
}

/// Render a parameter-type list the way a function breakpoint's
/// `paramSignature` is compared against at hit time (spec §4.3 "Function
/// hit": "render each argument's type, join with commas, parenthesize").
pub fn render_param_signature(param_types: &[String]) -> String {
    format!("({})", param_types.join(","))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suffix_match_basic() {
        assert!(suffix_matches_dotted("A.B", "Ns.Outer.A.B"));
        assert!(suffix_matches_dotted("B", "Ns.Outer.A.B"));
        assert!(!suffix_matches_dotted("X.B", "Ns.Outer.A.B"));
        assert!(suffix_matches_dotted("Ns.Outer.A.B", "Ns.Outer.A.B"));
        assert!(!suffix_matches_dotted("Ns.Outer.A.B.Extra", "Ns.Outer.A.B"));
    }

    #[test]
    fn split_dotted_keeps_generic_args_whole() {
        let parts = split_dotted("Ns.Method<T1,T2>.Inner");
        assert_eq!(parts, vec!["Ns", "Method<T1,T2>", "Inner"]);
    }

    #[test]
    fn render_generic_name_consumes_args() {
        assert_eq!(render_generic_name("List`1", &["int".into()]), "List<int>");
        assert_eq!(
            render_generic_name("Dict`2", &["int".into(), "string".into()]),
            "Dict<int,string>"
        );
        assert_eq!(render_generic_name("Plain", &[]), "Plain");
    }

    #[test]
    fn render_param_signature_parenthesizes() {
        assert_eq!(
            render_param_signature(&["int".into(), "string".into()]),
            "(int,string)"
        );
        assert_eq!(render_param_signature(&[]), "()");
    }
}
