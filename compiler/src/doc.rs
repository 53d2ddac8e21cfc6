const TAB_WIDTH: usize = 4;

/// Strips the common indentation of a doc block and trims it.
///
/// Indentation is measured over non-blank lines with tabs counted as four
/// columns. Blank lines become empty. `None` and `""` give `""`.
pub fn normalize_doc(raw: Option<&str>) -> String {
    let text = match raw {
        Some(text) if !text.is_empty() => text,
        _ => return String::new(),
    };

    let min_indent = text
        .split('\n')
        .filter(|line| !line.trim().is_empty())
        .map(indent_width)
        .min()
        .unwrap_or(0);

    if min_indent == 0 {
        return text.trim().to_string();
    }

    let lines: Vec<&str> = text
        .split('\n')
        .map(|line| {
            if line.trim().is_empty() {
                ""
            } else {
                strip_indent(line, min_indent)
            }
        })
        .collect();

    lines.join("\n").trim().to_string()
}

fn indent_width(line: &str) -> usize {
    let mut width = 0;
    for c in line.chars() {
        match c {
            ' '  => width += 1,
            '\t' => width += TAB_WIDTH,
            _    => break,
        }
    }
    width
}

fn strip_indent(line: &str, columns: usize) -> &str {
    let mut removed = 0;
    let mut idx = 0;
    for (i, c) in line.char_indices() {
        if removed >= columns {
            break;
        }
        match c {
            ' '  => removed += 1,
            '\t' => removed += TAB_WIDTH,
            _    => break,
        }
        idx = i + 1;
    }
    &line[idx..]
}
