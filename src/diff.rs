//! Line-level diffing between two normalized snapshots.
//!
//! The edit script is the Myers shortest edit script over whole lines, computed in linear space.
//! Regions whose edit cost exceeds a fixed bound are reported as replaced wholesale, which keeps a
//! full rewrite of a long page cheap. Rendering follows the
//! classic unified format (`---`/`+++` headers, `@@` hunks with surrounding context) and an HTML
//! variant with coloured markers for the e-mail body.

use std::fmt::Write as _;
use std::ops::Range;

/// Lines of context kept around each change when rendering hunks.
pub const DEFAULT_CONTEXT: usize = 3;
/// Rendered diffs longer than this are truncated around the middle.
pub const DEFAULT_MAX_LINES: usize = 2000;

const TRUNCATION_MARKER: &str = "... (diff truncated) ...";

/// Classification of a single diff record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// Present in both texts.
    Context,
    /// Only present in the current text.
    Added,
    /// Only present in the previous text.
    Removed,
}

impl ChangeKind {
    fn marker(self) -> char {
        match self {
            Self::Context => ' ',
            Self::Added => '+',
            Self::Removed => '-',
        }
    }
}

/// One line of the edit script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffLine {
    /// Whether the line was kept, added or removed.
    pub kind: ChangeKind,
    /// Line content without the trailing newline.
    pub text: String,
}

/// Added/removed line counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffStats {
    /// Lines only present in the current text.
    pub added: usize,
    /// Lines only present in the previous text.
    pub removed: usize,
}

/// Ordered edit script between a previous and a current text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffResult {
    lines: Vec<DiffLine>,
}

/// Contiguous region of the edit script rendered together.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Hunk {
    old_start: usize,
    old_len: usize,
    new_start: usize,
    new_len: usize,
    records: Range<usize>,
}

impl Hunk {
    fn header(&self) -> String {
        format!(
            "@@ -{} +{} @@",
            format_range(self.old_start, self.old_len),
            format_range(self.new_start, self.new_len)
        )
    }
}

/// Computes the line diff between `previous` and `current`.
pub fn diff_lines(previous: &str, current: &str) -> DiffResult {
    let old: Vec<&str> = previous.lines().collect();
    let new: Vec<&str> = current.lines().collect();

    let lines = shortest_edit(&old, &new)
        .into_iter()
        .map(|edit| match edit {
            Edit::Keep(i) => DiffLine {
                kind: ChangeKind::Context,
                text: old[i].to_string(),
            },
            Edit::Delete(i) => DiffLine {
                kind: ChangeKind::Removed,
                text: old[i].to_string(),
            },
            Edit::Insert(j) => DiffLine {
                kind: ChangeKind::Added,
                text: new[j].to_string(),
            },
        })
        .collect();
    DiffResult { lines }
}

impl DiffResult {
    /// All records in order, context included.
    pub fn lines(&self) -> &[DiffLine] {
        &self.lines
    }

    /// Records that are additions or removals.
    pub fn changes(&self) -> impl Iterator<Item = &DiffLine> {
        self.lines
            .iter()
            .filter(|line| line.kind != ChangeKind::Context)
    }

    /// True when both texts had identical lines.
    pub fn is_unchanged(&self) -> bool {
        self.changes().next().is_none()
    }

    /// Counts added and removed lines.
    pub fn stats(&self) -> DiffStats {
        self.lines
            .iter()
            .fold(DiffStats::default(), |mut stats, line| {
                match line.kind {
                    ChangeKind::Added => stats.added += 1,
                    ChangeKind::Removed => stats.removed += 1,
                    ChangeKind::Context => {}
                }
                stats
            })
    }

    /// Renders a unified diff with `context` lines around each hunk, truncated to `max_lines`.
    pub fn unified(&self, context: usize, max_lines: usize) -> String {
        let hunks = self.hunks(context);
        if hunks.is_empty() {
            return String::new();
        }

        let mut out = vec!["--- previous".to_string(), "+++ current".to_string()];
        for hunk in &hunks {
            out.push(hunk.header());
            for line in &self.lines[hunk.records.clone()] {
                out.push(format!("{}{}", line.kind.marker(), line.text));
            }
        }
        truncate_middle(out, max_lines).join("\n")
    }

    /// Renders the hunks as an HTML `<pre>` block with coloured added/removed markers.
    pub fn html(&self, context: usize, max_lines: usize) -> String {
        let mut rows = Vec::new();
        for hunk in self.hunks(context) {
            rows.push(format!(
                r#"<span style="color:#6e7781;">{}</span>"#,
                html_escape::encode_text(&hunk.header())
            ));
            for line in &self.lines[hunk.records] {
                let text = html_escape::encode_text(&line.text);
                let row = match line.kind {
                    ChangeKind::Context => format!("  {text}"),
                    ChangeKind::Added => format!(
                        r#"<span style="background:#e6ffec;color:#1a7f37;">+ {text}</span>"#
                    ),
                    ChangeKind::Removed => format!(
                        r#"<span style="background:#ffebe9;color:#cf222e;">- {text}</span>"#
                    ),
                };
                rows.push(row);
            }
        }

        let mut html = String::from(
            r#"<pre style="white-space:pre-wrap; word-wrap:break-word; font-family:monospace;">"#,
        );
        for row in truncate_middle(rows, max_lines) {
            let _ = writeln!(html, "{row}");
        }
        html.push_str("</pre>");
        html
    }

    fn hunks(&self, context: usize) -> Vec<Hunk> {
        let changed: Vec<usize> = self
            .lines
            .iter()
            .enumerate()
            .filter(|(_, line)| line.kind != ChangeKind::Context)
            .map(|(idx, _)| idx)
            .collect();
        let Some(&first) = changed.first() else {
            return Vec::new();
        };

        let mut ranges: Vec<Range<usize>> = Vec::new();
        let mut current = first.saturating_sub(context)..(first + context + 1).min(self.lines.len());
        for &idx in &changed[1..] {
            let start = idx.saturating_sub(context);
            if start <= current.end {
                current.end = (idx + context + 1).min(self.lines.len());
            } else {
                ranges.push(current);
                current = start..(idx + context + 1).min(self.lines.len());
            }
        }
        ranges.push(current);

        let mut hunks = Vec::with_capacity(ranges.len());
        let (mut old_seen, mut new_seen, mut cursor) = (0usize, 0usize, 0usize);
        for records in ranges {
            for line in &self.lines[cursor..records.start] {
                advance(line.kind, &mut old_seen, &mut new_seen);
            }
            let (old_before, new_before) = (old_seen, new_seen);
            for line in &self.lines[records.clone()] {
                advance(line.kind, &mut old_seen, &mut new_seen);
            }
            cursor = records.end;
            hunks.push(Hunk {
                old_start: old_before,
                old_len: old_seen - old_before,
                new_start: new_before,
                new_len: new_seen - new_before,
                records,
            });
        }
        hunks
    }
}

fn advance(kind: ChangeKind, old_seen: &mut usize, new_seen: &mut usize) {
    match kind {
        ChangeKind::Context => {
            *old_seen += 1;
            *new_seen += 1;
        }
        ChangeKind::Removed => *old_seen += 1,
        ChangeKind::Added => *new_seen += 1,
    }
}

/// `start` is the count of lines preceding the range.
fn format_range(start: usize, len: usize) -> String {
    match len {
        0 => format!("{start},0"),
        1 => format!("{}", start + 1),
        _ => format!("{},{}", start + 1, len),
    }
}

fn truncate_middle(lines: Vec<String>, max_lines: usize) -> Vec<String> {
    if lines.len() <= max_lines {
        return lines;
    }
    let half = max_lines / 2;
    let mut out = Vec::with_capacity(half * 2 + 1);
    out.extend_from_slice(&lines[..half]);
    out.push(TRUNCATION_MARKER.to_string());
    out.extend_from_slice(&lines[lines.len() - half..]);
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Edit {
    Keep(usize),
    Delete(usize),
    Insert(usize),
}

/// Edit cost searched per region before the region is reported as replaced wholesale.
const MAX_EDIT_COST: usize = 1024;

/// Myers shortest edit script in linear space (middle-snake divide and conquer).
///
/// Each change run lists its deletions before its insertions.
fn shortest_edit(old: &[&str], new: &[&str]) -> Vec<Edit> {
    let mut edits = Vec::with_capacity(old.len() + new.len());
    edit_region(old, new, 0..old.len(), 0..new.len(), &mut edits);
    group_changes(edits)
}

fn edit_region(
    old: &[&str],
    new: &[&str],
    mut a: Range<usize>,
    mut b: Range<usize>,
    edits: &mut Vec<Edit>,
) {
    while a.start < a.end && b.start < b.end && old[a.start] == new[b.start] {
        edits.push(Edit::Keep(a.start));
        a.start += 1;
        b.start += 1;
    }
    let mut tail = 0;
    while a.end - tail > a.start
        && b.end - tail > b.start
        && old[a.end - tail - 1] == new[b.end - tail - 1]
    {
        tail += 1;
    }
    a.end -= tail;
    b.end -= tail;

    if a.is_empty() {
        edits.extend(b.clone().map(Edit::Insert));
    } else if b.is_empty() {
        edits.extend(a.clone().map(Edit::Delete));
    } else if let Some((x, y)) = middle_snake(old, new, a.clone(), b.clone()) {
        edit_region(old, new, a.start..x, b.start..y, edits);
        edit_region(old, new, x..a.end, y..b.end, edits);
    } else {
        edits.extend(a.clone().map(Edit::Delete));
        edits.extend(b.clone().map(Edit::Insert));
    }

    edits.extend((a.end..a.end + tail).map(Edit::Keep));
}

/// Finds a point on a shortest path through the region, or `None` once the cost passes
/// [`MAX_EDIT_COST`]. Callers have already stripped the common prefix and suffix.
fn middle_snake(
    old: &[&str],
    new: &[&str],
    a: Range<usize>,
    b: Range<usize>,
) -> Option<(usize, usize)> {
    let n = a.len() as isize;
    let m = b.len() as isize;
    let delta = n - m;
    let odd = delta % 2 != 0;
    let max = ((n + m + 1) / 2).min(MAX_EDIT_COST as isize);
    let offset = max + 1;
    let mut forward = vec![0isize; (2 * max + 3) as usize];
    let mut backward = vec![0isize; (2 * max + 3) as usize];
    let at = |k: isize| (k + offset) as usize;

    for d in 0..=max {
        let mut k = -d;
        while k <= d {
            let mut x = if k == -d || (k != d && forward[at(k - 1)] < forward[at(k + 1)]) {
                forward[at(k + 1)]
            } else {
                forward[at(k - 1)] + 1
            };
            let mut y = x - k;
            let (start_x, start_y) = (x, y);
            while x < n && y < m && old[a.start + x as usize] == new[b.start + y as usize] {
                x += 1;
                y += 1;
            }
            forward[at(k)] = x;
            let c = delta - k;
            if odd && (-(d - 1)..=d - 1).contains(&c) && n - backward[at(c)] <= x {
                return Some((a.start + start_x as usize, b.start + start_y as usize));
            }
            k += 2;
        }

        let mut c = -d;
        while c <= d {
            let mut u = if c == -d || (c != d && backward[at(c - 1)] < backward[at(c + 1)]) {
                backward[at(c + 1)]
            } else {
                backward[at(c - 1)] + 1
            };
            let mut v = u - c;
            let (start_u, start_v) = (u, v);
            while u < n
                && v < m
                && old[a.end - 1 - u as usize] == new[b.end - 1 - v as usize]
            {
                u += 1;
                v += 1;
            }
            backward[at(c)] = u;
            let k = delta - c;
            if !odd && (-d..=d).contains(&k) && n - u <= forward[at(k)] {
                return Some((a.end - start_u as usize, b.end - start_v as usize));
            }
            c += 2;
        }
    }
    None
}

/// Reorders every run of changes so its deletions precede its insertions.
fn group_changes(edits: Vec<Edit>) -> Vec<Edit> {
    let mut grouped = Vec::with_capacity(edits.len());
    let mut inserts = Vec::new();
    for edit in edits {
        match edit {
            Edit::Keep(_) => {
                grouped.append(&mut inserts);
                grouped.push(edit);
            }
            Edit::Delete(_) => grouped.push(edit),
            Edit::Insert(_) => inserts.push(edit),
        }
    }
    grouped.append(&mut inserts);
    grouped
}
