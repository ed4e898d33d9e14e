use unicode_width::UnicodeWidthStr;

/// Layout of aligned schema text, in terminal cells.
pub struct TextMetrics {
    pub indent: usize,
    /// Cells between an aligned column and the next one.
    pub gap: usize,
}

impl Default for TextMetrics {
    fn default() -> Self {
        Self { indent: 4, gap: 1 }
    }
}

impl TextMetrics {
    pub fn text_width(&self, text: &str) -> usize {
        UnicodeWidthStr::width(text)
    }

    /// Widest cell of every column, over rows of possibly uneven length.
    pub fn column_widths<S: AsRef<str>>(&self, rows: &[Vec<S>]) -> Vec<usize> {
        let mut widths = Vec::new();
        for row in rows {
            for (i, cell) in row.iter().enumerate() {
                let w = self.text_width(cell.as_ref());
                if i == widths.len() {
                    widths.push(w);
                } else if widths[i] < w {
                    widths[i] = w;
                }
            }
        }
        widths
    }

    /// `text` followed by enough spaces to fill `width` cells plus the gap.
    pub fn pad(&self, text: &str, width: usize) -> String {
        let fill = width.saturating_sub(self.text_width(text)) + self.gap;
        format!("{}{}", text, " ".repeat(fill))
    }

    /// One indented line: every cell but the last padded to its column.
    pub fn line<S: AsRef<str>>(&self, cells: &[S], widths: &[usize]) -> String {
        let mut out = " ".repeat(self.indent);
        let last = cells.len().saturating_sub(1);
        for (i, cell) in cells.iter().enumerate() {
            if i == last {
                out.push_str(cell.as_ref());
            } else {
                out.push_str(&self.pad(cell.as_ref(), widths.get(i).copied().unwrap_or(0)));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ascii_width() {
        let m = TextMetrics::default();
        assert_eq!(m.text_width("User"), 4);
    }

    #[test]
    fn test_unicode_width() {
        let m = TextMetrics::default();
        // 全角文字は幅2
        assert_eq!(m.text_width("ユーザー"), 8);
        assert_eq!(m.text_width("Userテスト"), 10);
    }

    #[test]
    fn test_column_widths() {
        let m = TextMetrics::default();
        let rows = vec![vec!["int8:", "a;"], vec!["array<名前>:", "bb;"], vec!["x"]];
        assert_eq!(m.column_widths(&rows), vec![12, 3]);
    }

    #[test]
    fn test_line() {
        let m = TextMetrics::default();
        assert_eq!(m.line(&["int8:", "a;"], &[7, 2]), "    int8:   a;");
        assert_eq!(m.pad("名前", 4), "名前 ");
    }
}
