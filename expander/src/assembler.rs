//! Splices generated fragments back into the document.

use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;
use tracing::info;

use crate::context::Fragment;

static DATA_STATEMENT: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"\bdata\s*;"));
static END_STATEMENT: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"\bend\s*;"));

/// Where the data text produced by commands ends up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataMode {
    /// Right after the command, wrapped as `;data;<data>model;`.
    #[default]
    Inline,
    /// Collected and placed in a single data section of the output.
    Consolidated,
}

/// Characters trimmed from a construct before it is echoed in a marker comment.
const MARKER_TRIM: &[char] = &['/', '*', '#', '$', ';', ' '];

/// Output offsets of the first `data;` and `end;` statements in model text.
#[derive(Debug, Default)]
struct Anchors {
    /// Just past the first `data;`.
    data: Option<usize>,
    end: Option<Range<usize>>,
}

/// Builds the output document region by region.
#[derive(Debug)]
pub struct Assembler {
    mode: DataMode,
    comment_cmds: bool,
    output: String,
    data: String,
    anchors: Anchors,
}

impl Assembler {
    pub fn new(mode: DataMode, comment_cmds: bool) -> Self {
        Assembler {
            mode,
            comment_cmds,
            output: String::new(),
            data: String::new(),
            anchors: Anchors::default(),
        }
    }

    /// Copy model text unchanged, noting where its `data;` and `end;` statements are.
    pub fn code(&mut self, text: &str) {
        let offset = self.output.len();
        let joined = self
            .output
            .chars()
            .next_back()
            .is_some_and(|c| c.is_alphanumeric() || c == '_');
        if self.anchors.data.is_none() {
            self.anchors.data = first_statement(&DATA_STATEMENT, text, joined).map(|m| offset + m.end);
        }
        if self.anchors.end.is_none() {
            self.anchors.end = first_statement(&END_STATEMENT, text, joined)
                .map(|m| offset + m.start..offset + m.end);
        }
        self.output.push_str(text);
    }

    /// Copy strings and `#` comments unchanged.
    pub fn literal(&mut self, text: &str) {
        self.output.push_str(text);
    }

    /// A `/* */` comment, marked as ignored when commands are echoed.
    pub fn block_comment(&mut self, text: &str) {
        if self.comment_cmds {
            self.output.push_str(&format!("/*IGNORED:{}*/", text.trim_matches(MARKER_TRIM)));
        } else {
            self.output.push_str(text);
        }
    }

    /// Replace the construct `source` by the fragment it produced.
    pub fn fragment(&mut self, source: &str, fragment: Fragment) {
        if self.comment_cmds {
            self.output
                .push_str(&format!("/*EVALUATED:{}*/", source.trim_matches(MARKER_TRIM)));
        }
        self.output.push_str(&fragment.defs);
        self.output.push_str(&fragment.model);
        if fragment.data.is_empty() {
            return;
        }
        match self.mode {
            DataMode::Inline => {
                self.output.push_str(";data;");
                self.output.push_str(&fragment.data);
                self.output.push_str("model;");
            }
            DataMode::Consolidated => self.data.push_str(&fragment.data),
        }
    }

    pub fn finish(self) -> String {
        if self.data.is_empty() {
            return self.output;
        }
        info!(bytes = self.data.len(), "adding data section");
        add_data(&self.output, &self.data, &self.anchors)
    }
}

/// First match of `pattern` in `text`, skipping one glued to the preceding output.
fn first_statement(
    pattern: &Result<Regex, regex::Error>,
    text: &str,
    joined: bool,
) -> Option<Range<usize>> {
    let re = pattern.as_ref().ok()?;
    re.find_iter(text)
        .map(|m| m.range())
        .find(|m| !(joined && m.start == 0))
}

/// Insert `data` after the first `data;` statement, or in a new data section
/// placed before `end;` or at the end of the document.
fn add_data(output: &str, data: &str, anchors: &Anchors) -> String {
    if let Some(after) = anchors.data {
        return format!("{}\n{}{}", &output[..after], data, &output[after..]);
    }
    match &anchors.end {
        Some(end) => format!(
            "{}data;\n{}\nend;{}",
            &output[..end.start],
            data,
            &output[end.end..]
        ),
        None => format!("{}data;\n{}\nend;", output, data),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fragment(model: &str, data: &str) -> Fragment {
        Fragment {
            defs: "set I;".to_string(),
            model: model.to_string(),
            data: data.to_string(),
        }
    }

    #[test]
    fn inline_data_follows_the_fragment() {
        let mut asm = Assembler::new(DataMode::Inline, false);
        asm.literal("a ");
        asm.fragment("$PARAM[I]{[1]};", fragment("x", "param p := 1;"));
        asm.literal(" b");
        assert_eq!(asm.finish(), "a set I;x;data;param p := 1;model; b");
    }

    fn consolidated(parts: &[&str]) -> String {
        let mut asm = Assembler::new(DataMode::Consolidated, false);
        for part in parts {
            asm.code(part);
        }
        asm.fragment("$PARAM[p]{1};", fragment("", "param p := 1;"));
        asm.finish()
    }

    #[test]
    fn consolidated_data_after_data_statement() {
        assert_eq!(
            consolidated(&["var x;\ndata;\nend;"]),
            "var x;\ndata;\nparam p := 1;\nend;set I;"
        );
    }

    #[test]
    fn consolidated_data_before_end() {
        assert_eq!(
            consolidated(&["var x;\n", "end ;\n"]),
            "var x;\ndata;\nparam p := 1;\nend;\nset I;"
        );
    }

    #[test]
    fn consolidated_data_appended() {
        assert_eq!(consolidated(&["var x;\n"]), "var x;\nset I;data;\nparam p := 1;\nend;");
        assert_eq!(
            consolidated(&["var meta", "data;"]),
            "var metadata;set I;data;\nparam p := 1;\nend;"
        );
    }

    #[test]
    fn statements_outside_code_are_not_anchors() {
        let mut asm = Assembler::new(DataMode::Consolidated, false);
        asm.literal("# end; of header\n");
        asm.code("var x;\n");
        asm.literal("\"data;\"");
        asm.fragment("$PARAM[p]{1};", fragment("", "param p := 1;"));
        asm.code("\nend;\n");
        assert_eq!(
            asm.finish(),
            "# end; of header\nvar x;\n\"data;\"set I;\ndata;\nparam p := 1;\nend;\n"
        );
    }

    #[test]
    fn comment_markers() {
        let mut asm = Assembler::new(DataMode::Consolidated, true);
        asm.block_comment("/* $SET[A]{[1]}; */");
        asm.literal("\n");
        asm.fragment("$PARAM[Y]{10};", Fragment::default());
        assert_eq!(asm.finish(), "/*IGNORED:SET[A]{[1]}*/\n/*EVALUATED:PARAM[Y]{10}*/");
    }
}
