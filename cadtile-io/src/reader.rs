use std::io::BufRead;

/// 组码/值行对的读取结果。
#[derive(Debug, PartialEq)]
pub(crate) enum TagRead {
    Pair(i32, String),
    /// 组码行无法解析为整数，该对被跳过。
    BadCode { line: usize },
    /// 组码行之后没有值行。
    Truncated { line: usize },
    End,
}

/// 逐行读取的 DXF 组码对读取器。非 UTF-8 字节按替换字符处理，不会中断。
pub(crate) struct TagReader<R> {
    source: R,
    buffer: Vec<u8>,
    line_number: usize,
}

impl<R: BufRead> TagReader<R> {
    pub(crate) fn new(source: R) -> Self {
        Self {
            source,
            buffer: Vec::with_capacity(256),
            line_number: 0,
        }
    }

    pub(crate) fn next_pair(&mut self) -> std::io::Result<TagRead> {
        let Some(code_line) = self.next_line()? else {
            return Ok(TagRead::End);
        };
        let Some(value_line) = self.next_line()? else {
            return Ok(TagRead::Truncated {
                line: self.line_number,
            });
        };
        match code_line.parse::<i32>() {
            Ok(code) => Ok(TagRead::Pair(code, value_line)),
            Err(_) => Ok(TagRead::BadCode {
                line: self.line_number - 1,
            }),
        }
    }

    fn next_line(&mut self) -> std::io::Result<Option<String>> {
        self.buffer.clear();
        let read = self.source.read_until(b'\n', &mut self.buffer)?;
        if read == 0 {
            return Ok(None);
        }
        self.line_number += 1;
        let text = String::from_utf8_lossy(&self.buffer);
        Ok(Some(text.trim().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_pairs_and_reports_truncation() {
        let data = "  0\r\nLINE\r\n  5\r\n1A\r\n 62\r\n";
        let mut reader = TagReader::new(data.as_bytes());
        assert_eq!(reader.next_pair().unwrap(), TagRead::Pair(0, "LINE".into()));
        assert_eq!(reader.next_pair().unwrap(), TagRead::Pair(5, "1A".into()));
        assert_eq!(reader.next_pair().unwrap(), TagRead::Truncated { line: 5 });
    }

    #[test]
    fn bad_code_line_is_reported_and_skipped() {
        let data = "x\nfoo\n0\nEOF\n";
        let mut reader = TagReader::new(data.as_bytes());
        assert_eq!(reader.next_pair().unwrap(), TagRead::BadCode { line: 1 });
        assert_eq!(reader.next_pair().unwrap(), TagRead::Pair(0, "EOF".into()));
        assert_eq!(reader.next_pair().unwrap(), TagRead::End);
    }
}
