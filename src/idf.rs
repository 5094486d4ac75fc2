//! Minimal EnergyPlus input (IDF) rewriting.
//!
//! IDF objects are comma separated fields terminated by `;`; `!` starts a
//! comment running to the end of the line.

const DROPPED_CLASSES: [&str; 2] = ["output:variable", "output:sqlite"];

/// Split IDF text into objects; each piece keeps its leading whitespace and comments.
fn split_objects(idf: &str) -> (Vec<&str>, &str) {
    let mut objects = Vec::new();
    let mut start = 0;
    let mut in_comment = false;
    for (i, c) in idf.char_indices() {
        match c {
            '!' if !in_comment => in_comment = true,
            '\n' => in_comment = false,
            ';' if !in_comment => {
                objects.push(&idf[start..=i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    (objects, &idf[start..])
}

/// Class name of one object: the first field with comments removed.
fn class_name(object: &str) -> String {
    let code: String = object
        .lines()
        .map(|line| line.split('!').next().unwrap_or_default())
        .collect::<Vec<_>>()
        .join("\n");
    code.split([',', ';']).next().unwrap_or_default().trim().to_lowercase()
}

/// Replace every `Output:Variable` and `Output:SQLite` object with one hourly
/// output variable per entry of `variables` and a tabular SQLite output.
pub fn rewrite_output_variables(idf: &str, variables: &[&str]) -> String {
    let (objects, trailer) = split_objects(idf);
    let mut out = String::with_capacity(idf.len());
    for object in objects {
        if !DROPPED_CLASSES.contains(&class_name(object).as_str()) {
            out.push_str(object);
        }
    }
    out.push_str(trailer.trim_end());
    out.push('\n');

    for variable in variables {
        out.push_str(&format!(
            "\nOutput:Variable,\n  *,                        !- Key Value\n  {},{:pad$}!- Variable Name\n  Hourly;                   !- Reporting Frequency\n",
            variable,
            "",
            pad = 25usize.saturating_sub(variable.len() + 1).max(1)
        ));
    }
    out.push_str("\nOutput:SQLite,\n  SimpleAndTabular;         !- Option Type\n");
    out
}
