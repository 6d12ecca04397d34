// Delimited conversation log reader
//
// Accepts comma, tab, semicolon or pipe separated files with or without a
// header row and groups rows into conversations by identifier.

use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use super::error::{CorpusError, Result};
use super::types::{Conversation, ConversationTurn};

/// Bytes inspected when sniffing the dialect.
const SNIFF_BYTES: usize = 4096;

const CANDIDATE_DELIMITERS: [u8; 4] = [b',', b'\t', b';', b'|'];

const ID_ALIASES: &[&str] = &["id", "conversation_id", "conv_id"];
const PATIENT_ALIASES: &[&str] = &["patient", "patient_answer", "user", "customer"];
const DOCTOR_ALIASES: &[&str] = &["doctor", "doctor_response", "assistant", "question"];

/// Delimiter and header layout of an input file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dialect {
    pub delimiter: u8,
    pub has_header: bool,
}

impl Dialect {
    /// Used when sniffing fails: tab if the sample has one, else comma, header assumed.
    pub fn fallback(sample: &str) -> Self {
        Self {
            delimiter: if sample.contains('\t') { b'\t' } else { b',' },
            has_header: true,
        }
    }

    /// Sniff the dialect, falling back to the fixed heuristic on failure.
    pub fn detect(sample: &str) -> Self {
        match sniff_dialect(sample) {
            Some(dialect) => dialect,
            None => {
                let dialect = Self::fallback(sample);
                tracing::warn!(
                    delimiter = %(dialect.delimiter as char).escape_default(),
                    "Could not sniff delimiter, using fallback"
                );
                dialect
            }
        }
    }
}

/// Row counters reported after loading.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CorpusStats {
    pub rows_read: usize,
    pub rows_kept: usize,
    pub conversations: usize,
}

impl fmt::Display for CorpusStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rows read: {}, kept: {}, conversations: {}",
            self.rows_read, self.rows_kept, self.conversations
        )
    }
}

/// Detect the delimiter and header presence from a text sample.
///
/// A delimiter qualifies when every complete line contains it the same,
/// non-zero number of times (quoted sections excluded). The highest count
/// wins; ties go to the earlier candidate. Returns `None` when nothing
/// qualifies.
///
/// The first line is a header when it names a known column, or when it
/// reads like one: no cell holds a `?`, its id cell never recurs, and a
/// later row carries a question in the doctor column.
pub fn sniff_dialect(sample: &str) -> Option<Dialect> {
    let sample = sample.trim_start_matches('\u{feff}');
    let mut lines: Vec<&str> = sample.lines().collect();

    // The last line may have been cut off by the sample window
    if sample.len() >= SNIFF_BYTES && !sample.ends_with('\n') && lines.len() > 1 {
        lines.pop();
    }
    let lines: Vec<&str> = lines.into_iter().filter(|l| !l.trim().is_empty()).collect();
    if lines.is_empty() {
        return None;
    }

    let mut best: Option<(u8, usize)> = None;
    for delimiter in CANDIDATE_DELIMITERS {
        let first = count_unquoted(lines[0], delimiter);
        if first == 0 {
            continue;
        }
        if lines.iter().all(|l| count_unquoted(l, delimiter) == first)
            && best.map_or(true, |(_, count)| first > count)
        {
            best = Some((delimiter, first));
        }
    }

    let (delimiter, _) = best?;
    let rows: Vec<Vec<String>> = lines
        .iter()
        .filter_map(|line| first_record(line, delimiter))
        .collect();
    let has_header = match rows.split_first() {
        Some((first, rest)) => {
            first.iter().any(|cell| is_known_column(cell)) || looks_like_header(first, rest)
        }
        None => false,
    };

    Some(Dialect {
        delimiter,
        has_header,
    })
}

fn count_unquoted(line: &str, delimiter: u8) -> usize {
    let mut in_quotes = false;
    let mut count = 0;
    for b in line.bytes() {
        if b == b'"' {
            in_quotes = !in_quotes;
        } else if b == delimiter && !in_quotes {
            count += 1;
        }
    }
    count
}

fn first_record(line: &str, delimiter: u8) -> Option<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(line.as_bytes());
    let record = reader.records().next()?.ok()?;
    Some(record.iter().map(|c| c.trim().to_string()).collect())
}

fn looks_like_header(first: &[String], rest: &[Vec<String>]) -> bool {
    let Some(first_id) = first.first() else {
        return false;
    };
    if first.iter().any(|cell| cell.is_empty() || cell.contains('?')) {
        return false;
    }
    let id_recurs = rest.iter().any(|row| row.first() == Some(first_id));
    let has_question = rest
        .iter()
        .any(|row| row.get(2).map_or(false, |cell| cell.contains('?')));
    !id_recurs && has_question
}

fn is_known_column(cell: &str) -> bool {
    let cell = cell.trim().to_ascii_lowercase();
    [ID_ALIASES, PATIENT_ALIASES, DOCTOR_ALIASES]
        .iter()
        .any(|aliases| aliases.contains(&cell.as_str()))
}

/// Column positions for id, patient and doctor text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ColumnMap {
    id: Option<usize>,
    patient: Option<usize>,
    doctor: Option<usize>,
}

impl ColumnMap {
    fn positional() -> Self {
        Self {
            id: Some(0),
            patient: Some(1),
            doctor: Some(2),
        }
    }

    fn from_header(header: &csv::StringRecord) -> Self {
        let cells: Vec<String> = header
            .iter()
            .map(|c| c.trim().trim_start_matches('\u{feff}').to_ascii_lowercase())
            .collect();

        // First alias present in the header wins
        let find = |aliases: &[&str]| {
            aliases
                .iter()
                .find_map(|alias| cells.iter().position(|c| c == alias))
        };

        let columns = Self {
            id: find(ID_ALIASES),
            patient: find(PATIENT_ALIASES),
            doctor: find(DOCTOR_ALIASES),
        };
        // Unrecognized names: read the columns by position
        if columns.id.is_none() && columns.patient.is_none() && columns.doctor.is_none() {
            return Self::positional();
        }
        columns
    }
}

/// Groups turns by conversation id, preserving first-seen order.
#[derive(Debug, Default)]
struct ConversationGrouper {
    conversations: Vec<Conversation>,
    index: HashMap<String, usize>,
}

impl ConversationGrouper {
    fn push(&mut self, id: &str, turn: ConversationTurn) {
        let idx = match self.index.get(id) {
            Some(&idx) => idx,
            None => {
                self.conversations.push(Conversation {
                    id: id.to_string(),
                    turns: Vec::new(),
                });
                self.index.insert(id.to_string(), self.conversations.len() - 1);
                self.conversations.len() - 1
            }
        };
        self.conversations[idx].turns.push(turn);
    }
}

/// Load and group conversations from a delimited file.
pub fn load_conversations(path: &Path) -> Result<(Vec<Conversation>, CorpusStats)> {
    if !path.exists() {
        return Err(CorpusError::NotFound(path.to_path_buf()));
    }

    let io_err = |source| CorpusError::Io {
        path: path.to_path_buf(),
        source,
    };

    let mut sample = Vec::with_capacity(SNIFF_BYTES);
    File::open(path)
        .map_err(io_err)?
        .take(SNIFF_BYTES as u64)
        .read_to_end(&mut sample)
        .map_err(io_err)?;
    let dialect = Dialect::detect(&String::from_utf8_lossy(&sample));

    tracing::debug!(
        delimiter = %(dialect.delimiter as char).escape_default(),
        has_header = dialect.has_header,
        "Detected corpus dialect"
    );

    let file = File::open(path).map_err(io_err)?;
    let (conversations, stats) = read_conversations(file, dialect).map_err(|source| {
        CorpusError::Csv {
            path: path.to_path_buf(),
            source,
        }
    })?;

    tracing::info!("[CSV] {}", stats);
    Ok((conversations, stats))
}

/// Read rows with a known dialect.
pub fn read_conversations<R: Read>(
    input: R,
    dialect: Dialect,
) -> std::result::Result<(Vec<Conversation>, CorpusStats), csv::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(dialect.delimiter)
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(input);

    let mut records = reader.records();
    let columns = if dialect.has_header {
        match records.next() {
            Some(header) => ColumnMap::from_header(&header?),
            None => return Ok((Vec::new(), CorpusStats::default())),
        }
    } else {
        ColumnMap::positional()
    };

    let mut grouper = ConversationGrouper::default();
    let mut stats = CorpusStats::default();

    for record in records {
        let record = record?;
        stats.rows_read += 1;

        if !dialect.has_header && record.len() < 3 {
            continue;
        }

        let cell = |col: Option<usize>| col.and_then(|i| record.get(i)).unwrap_or("").trim();
        let id = cell(columns.id);
        let turn = ConversationTurn::new(cell(columns.patient), cell(columns.doctor));

        if !id.is_empty() && !turn.is_empty() {
            grouper.push(id, turn);
            stats.rows_kept += 1;
        }
    }

    stats.conversations = grouper.conversations.len();
    Ok((grouper.conversations, stats))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sniff_comma_with_header() {
        let sample = "id,patient,doctor\nc1,I have a cough,How long?\nc1,3 days,Any fever?\n";
        let dialect = sniff_dialect(sample).unwrap();
        assert_eq!(dialect.delimiter, b',');
        assert!(dialect.has_header);
    }

    #[test]
    fn test_sniff_tab_without_header() {
        let sample = "c1\tcough, bad\tHow long?\nc2\tfever\tSince when?\n";
        let dialect = sniff_dialect(sample).unwrap();
        assert_eq!(dialect.delimiter, b'\t');
        assert!(!dialect.has_header);
    }

    #[test]
    fn test_sniff_ignores_quoted_delimiters() {
        let sample = "ID;Patient;Doctor\n\"c1\";\"a; b\";\"ok?\"\n";
        let dialect = sniff_dialect(sample).unwrap();
        assert_eq!(dialect.delimiter, b';');
        assert!(dialect.has_header);
    }

    #[test]
    fn test_sniff_failure_falls_back() {
        // Inconsistent delimiter counts
        let sample = "a,b,c\nd\te,f,g,h\n";
        assert!(sniff_dialect(sample).is_none());
        assert_eq!(
            Dialect::detect(sample),
            Dialect {
                delimiter: b'\t',
                has_header: true
            }
        );
        assert_eq!(Dialect::detect("no delimiters here").delimiter, b',');
    }

    #[test]
    fn test_header_aliases() {
        let data = "Doctor_response|Patient_Answer|ID\nWhere does it hurt?|My knee|k1\n";
        let dialect = Dialect::detect(data);
        assert_eq!(dialect.delimiter, b'|');

        let (convos, stats) = read_conversations(data.as_bytes(), dialect).unwrap();
        assert_eq!(stats.rows_read, 1);
        assert_eq!(convos[0].id, "k1");
        assert_eq!(convos[0].turns[0].patient.as_deref(), Some("My knee"));
        assert_eq!(convos[0].turns[0].doctor.as_deref(), Some("Where does it hurt?"));
    }

    #[test]
    fn test_unrecognized_header_is_skipped_and_read_by_position() {
        let data = "conversation,patient_text,doctor_text\n\
                    c1,I have a rash,Is it itchy?\n\
                    c1,Very,Since when?\n";
        let dialect = Dialect::detect(data);
        assert!(dialect.has_header);

        let (convos, stats) = read_conversations(data.as_bytes(), dialect).unwrap();
        assert_eq!(stats.rows_read, 2);
        assert_eq!(convos.len(), 1);
        assert_eq!(convos[0].id, "c1");
        assert_eq!(convos[0].turns[0].patient.as_deref(), Some("I have a rash"));
        assert_eq!(convos[0].turns[1].doctor.as_deref(), Some("Since when?"));
    }

    #[test]
    fn test_recurring_first_id_is_data() {
        // No question in the first row, but its id continues below
        let data = "c1,Hello,Good morning.\nc1,My ear hurts,Which side?\n";
        let dialect = sniff_dialect(data).unwrap();
        assert!(!dialect.has_header);

        let (convos, _) = read_conversations(data.as_bytes(), dialect).unwrap();
        assert_eq!(convos[0].turns.len(), 2);
    }

    #[test]
    fn test_grouping_preserves_order_and_drops_empty_rows() {
        let data = "id,patient,doctor\n\
                    b,hello,Hi?\n\
                    a,pain,Where?\n\
                    b,ok,\n\
                    ,orphan,Who?\n\
                    c,,\n";
        let dialect = Dialect::detect(data);
        let (convos, stats) = read_conversations(data.as_bytes(), dialect).unwrap();

        assert_eq!(
            stats,
            CorpusStats {
                rows_read: 5,
                rows_kept: 3,
                conversations: 2
            }
        );
        let ids: Vec<&str> = convos.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert_eq!(convos[0].turns.len(), 2);
        assert_eq!(convos[0].turns[1].doctor, None);
    }

    #[test]
    fn test_headerless_short_rows_are_skipped() {
        let dialect = Dialect {
            delimiter: b',',
            has_header: false,
        };
        let data = "c1,cough,How long?\nc1,only-two\n";
        let (convos, stats) = read_conversations(data.as_bytes(), dialect).unwrap();
        assert_eq!(stats.rows_read, 2);
        assert_eq!(stats.rows_kept, 1);
        assert_eq!(convos.len(), 1);
    }

    #[test]
    fn test_missing_file() {
        let err = load_conversations(Path::new("/no/such/conversation_data.csv")).unwrap_err();
        assert!(matches!(err, CorpusError::NotFound(_)));
    }
}
