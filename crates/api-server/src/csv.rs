//! CSV ingestion — an RFC 4180 reader onto the table model with per-cell
//! type inference. The first record is the header row.

use cohortlens_core::{Cell, CohortError, CohortResult, Frame};

/// Parse CSV bytes into a frame. Non-UTF-8 input is decoded lossily rather
/// than rejected, since exported spreadsheets arrive in assorted encodings.
pub fn read_frame(bytes: &[u8]) -> CohortResult<Frame> {
    let text = match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => String::from_utf8_lossy(bytes).into_owned(),
    };
    read_frame_str(&text)
}

pub fn read_frame_str(text: &str) -> CohortResult<Frame> {
    // Strip a UTF-8 BOM if present.
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut records = parse_records(text)?;
    if records.is_empty() {
        return Err(CohortError::Csv("file has no header row".to_string()));
    }
    let header = records.remove(0);
    if header.iter().all(|h| h.trim().is_empty()) {
        return Err(CohortError::Csv("header row is empty".to_string()));
    }

    let mut frame = Frame::new(header.iter().map(|h| h.trim().to_string()).collect());
    for (line, record) in records.into_iter().enumerate() {
        let mut row: Vec<Cell> = record.into_iter().map(infer_cell).collect();
        // Tolerate ragged rows: pad short ones with nulls, trim long ones.
        match row.len().cmp(&header.len()) {
            std::cmp::Ordering::Less => row.resize(header.len(), Cell::Null),
            std::cmp::Ordering::Greater => row.truncate(header.len()),
            std::cmp::Ordering::Equal => {}
        }
        frame
            .push_row(row)
            .map_err(|e| CohortError::Csv(format!("record {}: {e}", line + 2)))?;
    }
    Ok(frame)
}

fn infer_cell(field: String) -> Cell {
    let trimmed = field.trim();
    if trimmed.is_empty() {
        return Cell::Null;
    }
    if let Ok(i) = trimmed.parse::<i64>() {
        return Cell::Int(i);
    }
    if let Ok(f) = trimmed.parse::<f64>() {
        if f.is_finite() {
            return Cell::Float(f);
        }
    }
    Cell::Str(trimmed.to_string())
}

/// Split CSV text into records of fields, honoring quoted fields with
/// embedded separators, quotes and newlines.
fn parse_records(text: &str) -> CohortResult<Vec<Vec<String>>> {
    let mut records = Vec::new();
    let mut record: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' => {
                    if chars.peek() == Some(&'"') {
                        chars.next();
                        field.push('"');
                    } else {
                        in_quotes = false;
                    }
                }
                _ => field.push(c),
            }
            continue;
        }
        match c {
            '"' => {
                if field.is_empty() {
                    in_quotes = true;
                } else {
                    // A quote inside an unquoted field is kept literally.
                    field.push(c);
                }
            }
            ',' => {
                record.push(std::mem::take(&mut field));
            }
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                record.push(std::mem::take(&mut field));
                records.push(std::mem::take(&mut record));
            }
            '\n' => {
                record.push(std::mem::take(&mut field));
                records.push(std::mem::take(&mut record));
            }
            _ => field.push(c),
        }
    }
    if in_quotes {
        return Err(CohortError::Csv("unterminated quoted field".to_string()));
    }
    if !field.is_empty() || !record.is_empty() {
        record.push(field);
        records.push(record);
    }

    // Drop fully blank trailing lines.
    records.retain(|r| !(r.len() == 1 && r[0].is_empty()));
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_csv_with_type_inference() {
        let frame = read_frame_str("user,amount,date\na,10,2024-01-05\nb,2.5,2024-01-06\n")
            .unwrap();
        assert_eq!(frame.columns(), &["user", "amount", "date"]);
        assert_eq!(frame.len(), 2);
        assert_eq!(frame.cell(0, 1), &Cell::Int(10));
        assert_eq!(frame.cell(1, 1), &Cell::Float(2.5));
        assert_eq!(frame.cell(0, 2).as_str(), Some("2024-01-05"));
    }

    #[test]
    fn test_quoted_fields_with_commas_and_quotes() {
        let frame =
            read_frame_str("name,note\n\"Smith, Jane\",\"said \"\"hi\"\"\"\n").unwrap();
        assert_eq!(frame.cell(0, 0).as_str(), Some("Smith, Jane"));
        assert_eq!(frame.cell(0, 1).as_str(), Some("said \"hi\""));
    }

    #[test]
    fn test_crlf_and_empty_cells() {
        let frame = read_frame_str("a,b\r\n1,\r\n,2\r\n").unwrap();
        assert_eq!(frame.len(), 2);
        assert!(frame.cell(0, 1).is_null());
        assert!(frame.cell(1, 0).is_null());
    }

    #[test]
    fn test_quoted_field_with_newline() {
        let frame = read_frame_str("a,b\n\"line1\nline2\",x\n").unwrap();
        assert_eq!(frame.cell(0, 0).as_str(), Some("line1\nline2"));
    }

    #[test]
    fn test_ragged_rows_padded() {
        let frame = read_frame_str("a,b,c\n1,2\n1,2,3,4\n").unwrap();
        assert!(frame.cell(0, 2).is_null());
        assert_eq!(frame.cell(1, 2), &Cell::Int(3));
    }

    #[test]
    fn test_bom_and_lossy_decoding() {
        let mut bytes = vec![0xef, 0xbb, 0xbf];
        bytes.extend_from_slice(b"a\n1\n");
        let frame = read_frame(&bytes).unwrap();
        assert_eq!(frame.columns(), &["a"]);

        // Latin-1 bytes are not valid UTF-8; decoding degrades, not fails.
        let frame = read_frame(b"name\nJos\xe9\n").unwrap();
        assert_eq!(frame.len(), 1);
    }

    #[test]
    fn test_empty_input_fails() {
        assert!(read_frame_str("").is_err());
    }

    #[test]
    fn test_unterminated_quote_fails() {
        assert!(read_frame_str("a\n\"oops\n").is_err());
    }
}
