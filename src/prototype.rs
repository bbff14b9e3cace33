//! Helpers that pull function names and parameter types out of demangled C++ prototypes
//! such as `ns::Class<int>::method(char const*, double)`.

/// Marker the demangler emits for entities in anonymous namespaces
const ANONYMOUS_NAMESPACE: &str = "(anonymous namespace)";

/// Whether a symbol is known to be a C++ member function
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Method,
    Unknown,
}

/// Byte index of the `(` that opens the parameter list
fn parameter_list_start(demangled: &str) -> Option<usize> {
    let first = demangled.find('(')?;
    if demangled[first..].starts_with(ANONYMOUS_NAMESPACE) {
        let after = first + ANONYMOUS_NAMESPACE.len();
        demangled[after..].find('(').map(|idx| after + idx)
    } else {
        Some(first)
    }
}

/// The qualified function name of a demangled prototype, without return type and parameters
///
/// ```
/// use corescope::prototype::function_name;
/// assert_eq!(function_name("int ns::Cls<a, b>::run(int)"), "ns::Cls<a, b>::run");
/// ```
pub fn function_name(demangled: &str) -> String {
    let end = parameter_list_start(demangled).unwrap_or(demangled.len());
    let bytes = demangled.as_bytes();
    let mut depth = 0i32;
    let mut start = end;

    while start > 0 {
        let c = bytes[start - 1];
        if depth == 0 && (c == b' ' || c == b'*') {
            break;
        }
        match c {
            b'>' | b')' => depth += 1,
            b'<' | b'(' => depth -= 1,
            _ => {}
        }
        start -= 1;
    }

    demangled[start..end].to_string()
}

/// The part of a (function) name after its last `:`
pub fn short_name(name: &str) -> &str {
    match name.rfind(':') {
        Some(idx) if idx > 0 => &name[idx + 1..],
        _ => name,
    }
}

fn is_identifier_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// The parameter types of a demangled prototype, with whitespace and `const` removed
///
/// Returns [`None`] if the name has no parameter list, which is the case for C functions.
pub fn parameter_types(demangled: &str) -> Option<Vec<String>> {
    let open = parameter_list_start(demangled)?;
    let bytes = demangled.as_bytes();
    let mut types = Vec::new();
    let mut depth = 0i32;
    let mut i = open + 1;

    while i < bytes.len() && bytes[i] != b')' {
        let mut current = Vec::new();
        while i < bytes.len() && (depth > 0 || (bytes[i] != b')' && bytes[i] != b',')) {
            let c = bytes[i];
            if bytes[i..].starts_with(ANONYMOUS_NAMESPACE.as_bytes()) {
                i += ANONYMOUS_NAMESPACE.len();
                continue;
            }
            if bytes[i..].starts_with(b"const")
                && (i == 0 || !is_identifier_byte(bytes[i - 1]))
                && !bytes.get(i + 5).copied().is_some_and(is_identifier_byte)
            {
                i += 5;
                continue;
            }
            match c {
                b'(' | b'<' => depth += 1,
                b')' | b'>' => depth -= 1,
                b' ' => {
                    i += 1;
                    continue;
                }
                _ => {}
            }
            current.push(c);
            i += 1;
        }

        // an unterminated trailing part (like a cv-qualifier after the list) is not a parameter
        if i < bytes.len() && (bytes[i] == b',' || bytes[i] == b')') {
            types.push(String::from_utf8_lossy(&current).into_owned());
            i += 1;
        } else {
            break;
        }
    }

    Some(types)
}

/// The pointer type of the class a method belongs to, e.g. `ns::Class*` for
/// `ns::Class::method`
pub fn class_pointer_type(function: &str) -> Option<String> {
    let idx = function.rfind("::")?;
    Some(format!("{}*", &function[..idx]))
}

/// Classifies a symbol as a method where the name proves it
///
/// Operators are always members here, and the mangling of cv- and ref-qualified functions
/// only exists for members.
pub fn symbol_kind(mangled: &str, short_name: &str) -> SymbolKind {
    let qualified = ["_ZNK", "_ZNV", "_ZNR", "_ZNO"]
        .iter()
        .any(|prefix| mangled.starts_with(prefix));
    if short_name.starts_with("operator") || qualified {
        SymbolKind::Method
    } else {
        SymbolKind::Unknown
    }
}
