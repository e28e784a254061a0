//! 交换格式编码修复：探测源编码，转为 UTF-8，并把 `$DWGCODEPAGE` 改写为
//! `ANSI_1252`，使下游 ETL 工具不再按代码页二次解码。

use std::borrow::Cow;
use std::fs::{self, File};
use std::io::{BufRead, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use encoding_rs::{CoderResult, Decoder, Encoding};
use tracing::{debug, info, warn};

use crate::{IoError, open_buffered};

/// 编码探测时读取的样本上限。
const SAMPLE_LIMIT: usize = 2 * 1024 * 1024;

const CODE_PAGE_VARIABLE: &str = "$DWGCODEPAGE";
const REPLACEMENT_CODE_PAGE: &str = "ANSI_1252";

/// 探测得到的源编码。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectedEncoding {
    Utf8,
    Legacy(&'static Encoding),
}

impl DetectedEncoding {
    pub fn name(&self) -> &'static str {
        match self {
            DetectedEncoding::Utf8 => "UTF-8",
            DetectedEncoding::Legacy(encoding) => encoding.name(),
        }
    }

    /// 用于逐行转码的编码；UTF-8 输入同样经解码器，非法字节被替换。
    pub fn encoding(&self) -> &'static Encoding {
        match self {
            DetectedEncoding::Utf8 => encoding_rs::UTF_8,
            DetectedEncoding::Legacy(encoding) => encoding,
        }
    }
}

/// 依次尝试 UTF-8、GB18030、Big5、Shift_JIS，第一个能无损解码样本的胜出，否则回退 GBK。
pub fn detect_encoding(bytes: &[u8]) -> DetectedEncoding {
    let sample = sample_of(bytes);
    if std::str::from_utf8(sample).is_ok() {
        return DetectedEncoding::Utf8;
    }
    for candidate in [encoding_rs::GB18030, encoding_rs::BIG5, encoding_rs::SHIFT_JIS] {
        if candidate
            .decode_without_bom_handling_and_without_replacement(sample)
            .is_some()
        {
            return DetectedEncoding::Legacy(candidate);
        }
    }
    DetectedEncoding::Legacy(encoding_rs::GBK)
}

/// 截取样本并退到最后一个换行符，避免把多字节字符切成两半。
fn sample_of(bytes: &[u8]) -> &[u8] {
    if bytes.len() <= SAMPLE_LIMIT {
        return bytes;
    }
    let head = &bytes[..SAMPLE_LIMIT];
    match head.iter().rposition(|b| *b == b'\n') {
        Some(pos) => &head[..=pos],
        None => head,
    }
}

/// 原地把交换格式文件转为 UTF-8。逐行解码并写入同目录的 `<stem>_temp.dxf`，
/// 成功后再替换原文件；失败时删除临时文件并保留原文件。
pub fn repair_dxf_encoding(path: &Path) -> Result<DetectedEncoding, IoError> {
    let sample = read_sample(path)?;
    if sample.is_empty() {
        return Err(IoError::InvalidDocument {
            path: path.to_path_buf(),
            message: "文件为空".to_string(),
        });
    }

    let detected = detect_encoding(&sample);
    info!(path = %path.display(), encoding = detected.name(), "检测到交换格式编码");

    let temp = temp_path(path);
    if let Err(err) = transcode(path, &temp, detected) {
        discard(&temp);
        return Err(err);
    }
    if let Err(source) = fs::rename(&temp, path) {
        discard(&temp);
        return Err(IoError::write(path, source));
    }
    Ok(detected)
}

/// 多读一个字节，让 [`sample_of`] 能判断文件是否超出样本上限。
fn read_sample(path: &Path) -> Result<Vec<u8>, IoError> {
    let file = File::open(path).map_err(|source| IoError::read(path, source))?;
    let mut sample = Vec::new();
    file.take(SAMPLE_LIMIT as u64 + 1)
        .read_to_end(&mut sample)
        .map_err(|source| IoError::read(path, source))?;
    Ok(sample)
}

fn transcode(source: &Path, target: &Path, detected: DetectedEncoding) -> Result<(), IoError> {
    let mut reader = open_buffered(source)?;
    let file = File::create(target).map_err(|err| IoError::write(target, err))?;
    let mut writer = BufWriter::new(file);
    let mut decoder = detected.encoding().new_decoder_without_bom_handling();
    let mut rewriter = CodePageRewriter::default();
    let mut raw = Vec::new();
    let mut line = String::new();
    let mut had_errors = false;

    loop {
        raw.clear();
        let read = reader
            .read_until(b'\n', &mut raw)
            .map_err(|err| IoError::read(source, err))?;
        let last = read == 0;
        line.clear();
        had_errors |= decode_into(&mut decoder, &raw, &mut line, last);
        if !line.is_empty() {
            writer
                .write_all(rewriter.rewrite(&line).as_bytes())
                .map_err(|err| IoError::write(target, err))?;
        }
        if last {
            break;
        }
    }
    writer.flush().map_err(|err| IoError::write(target, err))?;

    if had_errors {
        debug!(encoding = detected.name(), "部分字节无法解码，已替换");
    }
    Ok(())
}

/// 解码器跨行保留状态，被换行截断的多字节序列在下一行补全。
fn decode_into(decoder: &mut Decoder, mut input: &[u8], output: &mut String, last: bool) -> bool {
    let mut had_errors = false;
    loop {
        if let Some(needed) = decoder.max_utf8_buffer_length(input.len()) {
            output.reserve(needed);
        }
        let (result, read, errors) = decoder.decode_to_string(input, output, last);
        had_errors |= errors;
        input = &input[read..];
        if let CoderResult::InputEmpty = result {
            return had_errors;
        }
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "drawing".to_string());
    path.with_file_name(format!("{stem}_temp.dxf"))
}

fn discard(temp: &Path) {
    if temp.exists() {
        if let Err(err) = fs::remove_file(temp) {
            warn!(path = %temp.display(), error = %err, "删除临时文件失败");
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
enum CodePageState {
    #[default]
    Scanning,
    Variable,
    GroupCode,
}

/// 把 `9 / $DWGCODEPAGE / 3 / <值>` 中的值替换为 `ANSI_1252`，保留原有换行符。
/// 结构不符合预期时原样输出。
#[derive(Debug, Default)]
struct CodePageRewriter {
    state: CodePageState,
}

impl CodePageRewriter {
    fn rewrite<'a>(&mut self, line: &'a str) -> Cow<'a, str> {
        let (next, output) = match self.state {
            CodePageState::Scanning if line.trim() == CODE_PAGE_VARIABLE => {
                (CodePageState::Variable, Cow::Borrowed(line))
            }
            CodePageState::Variable if line.trim() == "3" => (CodePageState::GroupCode, Cow::Borrowed(line)),
            CodePageState::GroupCode => {
                let ending = &line[line.trim_end_matches(['\r', '\n']).len()..];
                (
                    CodePageState::Scanning,
                    Cow::Owned(format!("{REPLACEMENT_CODE_PAGE}{ending}")),
                )
            }
            _ => (CodePageState::Scanning, Cow::Borrowed(line)),
        };
        self.state = next;
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rewrite_code_page(text: &str) -> String {
        let mut rewriter = CodePageRewriter::default();
        text.split_inclusive('\n')
            .map(|line| rewriter.rewrite(line).into_owned())
            .collect()
    }

    #[test]
    fn plain_ascii_is_utf8() {
        assert_eq!(detect_encoding(b"0\nSECTION\n"), DetectedEncoding::Utf8);
    }

    #[test]
    fn gbk_bytes_are_detected_as_gb18030() {
        let (bytes, _, _) = encoding_rs::GBK.encode("1\n墙体\n");
        assert_eq!(
            detect_encoding(&bytes),
            DetectedEncoding::Legacy(encoding_rs::GB18030)
        );
    }

    #[test]
    fn code_page_value_is_replaced_and_line_endings_kept() {
        let text = "  9\r\n$DWGCODEPAGE\r\n  3\r\nANSI_936\r\n  9\r\n$INSBASE\r\n";
        let rewritten = rewrite_code_page(text);
        assert_eq!(
            rewritten,
            "  9\r\n$DWGCODEPAGE\r\n  3\r\nANSI_1252\r\n  9\r\n$INSBASE\r\n"
        );
    }

    #[test]
    fn unexpected_code_page_structure_is_left_alone() {
        let text = "9\n$DWGCODEPAGE\n1\nANSI_936\n";
        assert_eq!(rewrite_code_page(text), text);
    }

    #[test]
    fn repair_rewrites_file_as_utf8() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("plan.dxf");
        let (encoded, _, _) =
            encoding_rs::GBK.encode("9\n$DWGCODEPAGE\n3\nANSI_936\n0\nTEXT\n1\n会议室\n0\nEOF\n");
        fs::File::create(&path)
            .and_then(|mut file| file.write_all(&encoded))
            .expect("write fixture");

        let detected = repair_dxf_encoding(&path).expect("repair");
        assert_ne!(detected, DetectedEncoding::Utf8);

        let repaired = fs::read_to_string(&path).expect("utf-8 output");
        assert!(repaired.contains("会议室"));
        assert!(repaired.contains("ANSI_1252"));
        assert!(!dir.path().join("plan_temp.dxf").exists());
    }

    #[test]
    fn large_drawing_is_streamed_past_the_sample() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("site.dxf");
        let mut source = String::from("9\n$DWGCODEPAGE\n3\nANSI_936\n0\nTEXT\n1\n会议室\n");
        while source.len() <= SAMPLE_LIMIT {
            source.push_str("0\nLINE\n8\nWALL\n");
        }
        source.push_str("0\nTEXT\n1\n楼梯间\r\n0\nEOF");
        let (encoded, _, _) = encoding_rs::GBK.encode(&source);
        fs::write(&path, &encoded).expect("write fixture");

        repair_dxf_encoding(&path).expect("repair");
        let repaired = fs::read_to_string(&path).expect("utf-8 output");
        assert!(repaired.starts_with("9\n$DWGCODEPAGE\n3\nANSI_1252\n"));
        assert!(repaired.ends_with("1\n楼梯间\r\n0\nEOF"));
        assert_eq!(repaired.len(), source.len() - "ANSI_936".len() + "ANSI_1252".len());
    }

    #[test]
    fn empty_file_is_rejected() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("blank.dxf");
        fs::write(&path, b"").expect("write fixture");
        assert!(matches!(
            repair_dxf_encoding(&path),
            Err(IoError::InvalidDocument { .. })
        ));
        assert!(!dir.path().join("blank_temp.dxf").exists());
    }
}
