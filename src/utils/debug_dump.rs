// src/utils/debug_dump.rs
use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;

/// Markers worth highlighting when a statement page could not be read.
pub const STATEMENT_PAGE_MARKERS: &[(&str, &str)] = &[
    (r#"(?i)id=["']?ctl00_cphPopUp_tbDados"#, "table"),
    (r#"(?i)id=["']?TituloTabelaSemBorda"#, "title"),
    (r"\bMil\b", "unit"),
    (r"(?i)<tr\b", "row"),
];

/// Writes `html` under `dir` as `<name>.html` with every match of `patterns`
/// wrapped in a highlighted span, so a failed extraction can be inspected in a
/// browser.
pub fn dump_annotated_page(
    dir: &Path,
    name: &str,
    html: &str,
    patterns: &[(&str, &str)],
) -> std::io::Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join(format!("{}.html", sanitize_file_name(name)));
    fs::write(&path, annotate(html, patterns))?;
    tracing::info!("Saved debug page to {}", path.display());
    Ok(path)
}

fn annotate(html: &str, patterns: &[(&str, &str)]) -> String {
    let mut highlights: Vec<(usize, usize, &str)> = Vec::new();
    for (pattern, kind) in patterns {
        match Regex::new(pattern) {
            Ok(re) => highlights.extend(re.find_iter(html).map(|m| (m.start(), m.end(), *kind))),
            Err(e) => tracing::warn!("Skipping invalid debug pattern '{}': {}", pattern, e),
        }
    }
    highlights.sort_by_key(|h| (h.0, h.1));

    let mut out = String::from(
        "<!DOCTYPE html>\n<html>\n<head>\n<style>\n\
         .hl-table { background-color: #90EE90; }\n\
         .hl-title { background-color: #ADD8E6; }\n\
         .hl-unit { background-color: #FFFF00; }\n\
         .hl-row { background-color: #FFC0CB; }\n\
         </style>\n</head>\n<body>\n<pre>\n",
    );
    let mut last = 0;
    for (start, end, kind) in highlights {
        // Overlapping matches are dropped.
        if start < last {
            continue;
        }
        out.push_str(&escape(&html[last..start]));
        out.push_str(&format!(
            "<span class=\"hl-{}\" title=\"{}-{}\">{}</span>",
            kind,
            start,
            end,
            escape(&html[start..end])
        ));
        last = end;
    }
    out.push_str(&escape(&html[last..]));
    out.push_str("\n</pre>\n</body>\n</html>");
    out
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_annotate_highlights_markers() {
        let html = r#"<div id="TituloTabelaSemBorda">Valores (Reais Mil)</div>"#;
        let annotated = annotate(html, STATEMENT_PAGE_MARKERS);
        assert!(annotated.contains("class=\"hl-title\""));
        assert!(annotated.contains("class=\"hl-unit\""));
        assert!(annotated.contains("&lt;div"));
    }

    #[test]
    fn test_dump_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dump_annotated_page(dir.path(), "123 DFs/Individuais", "<table></table>", &[]).unwrap();
        assert!(path.exists());
        assert_eq!(path.file_name().unwrap().to_str().unwrap(), "123_DFs_Individuais.html");
    }
}
