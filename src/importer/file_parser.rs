// ==========================================
// 商品目录导入引擎 - 源文件解析器实现
// ==========================================
// 支持: CSV (.csv) / XML (.xml)
// 读取方式: 流式扫描,按偏移量截取窗口,可从任意偏移重新开始
// ==========================================

use crate::domain::{SourceDescriptor, SourceFormat, SourceRecord};
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::source_parser_trait::{SourceBatch, SourceParser};
use crate::importer::structure_catalog::StructureCatalog;
use csv::ReaderBuilder;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::fs::File;
use std::io::BufReader;
use std::ops::ControlFlow;
use std::path::Path;
use tracing::debug;

fn ensure_exists(path: &Path) -> ImportResult<()> {
    if !path.exists() {
        return Err(ImportError::FileNotFound(path.display().to_string()));
    }
    Ok(())
}

// ==========================================
// BatchWindow - 偏移窗口收集器
// ==========================================
struct BatchWindow {
    offset: usize,
    limit: usize,
    records: Vec<SourceRecord>,
    exhausted: bool,
}

impl BatchWindow {
    fn new(offset: usize, limit: usize) -> ImportResult<Self> {
        if limit == 0 {
            return Err(ImportError::InvalidBatchSize(limit));
        }
        Ok(Self {
            offset,
            limit,
            records: Vec::with_capacity(limit),
            exhausted: true,
        })
    }

    fn offer(&mut self, record: SourceRecord) -> ControlFlow<()> {
        if record.index < self.offset {
            return ControlFlow::Continue(());
        }
        if self.records.len() >= self.limit {
            // 窗口之后仍有记录
            self.exhausted = false;
            return ControlFlow::Break(());
        }
        self.records.push(record);
        ControlFlow::Continue(())
    }

    fn finish(self) -> SourceBatch {
        SourceBatch {
            records: self.records,
            exhausted: self.exhausted,
        }
    }
}

fn read_window<F>(offset: usize, limit: usize, scan: F) -> ImportResult<SourceBatch>
where
    F: FnOnce(&mut dyn FnMut(SourceRecord) -> ControlFlow<()>) -> ImportResult<()>,
{
    let mut window = BatchWindow::new(offset, limit)?;
    scan(&mut |record| window.offer(record))?;
    let batch = window.finish();
    debug!(
        offset,
        limit,
        read = batch.read_count(),
        exhausted = batch.exhausted,
        "读取源记录窗口"
    );
    Ok(batch)
}

fn build_catalog<F>(sample_limit: usize, scan: F) -> ImportResult<StructureCatalog>
where
    F: FnOnce(&mut dyn FnMut(SourceRecord) -> ControlFlow<()>) -> ImportResult<()>,
{
    let mut catalog = StructureCatalog::new(sample_limit);
    scan(&mut |record| {
        catalog.observe(&record);
        ControlFlow::Continue(())
    })?;
    Ok(catalog)
}

// ==========================================
// CSV Parser 实现
// ==========================================
pub struct CsvSourceParser;

impl CsvSourceParser {
    /// 逐条扫描非空白行; index 为非空白行序号
    fn scan(
        &self,
        source: &SourceDescriptor,
        visit: &mut dyn FnMut(SourceRecord) -> ControlFlow<()>,
    ) -> ImportResult<()> {
        let path = Path::new(&source.file_path);
        ensure_exists(path)?;

        let delimiter = match source.delimiter {
            None => b',',
            Some(c) => u8::try_from(c)
                .map_err(|_| ImportError::UnsupportedFormat(format!("CSV 分隔符 {:?}", c)))?,
        };

        let file = File::open(path)?;
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .delimiter(delimiter)
            .flexible(true) // 允许行长度不一致
            .from_reader(file);

        // 读取表头（空表头以列号命名）
        let headers: Vec<String> = reader
            .headers()?
            .iter()
            .enumerate()
            .map(|(idx, h)| {
                let trimmed = h.trim().trim_start_matches('\u{feff}');
                if trimmed.is_empty() {
                    format!("column_{}", idx + 1)
                } else {
                    trimmed.to_string()
                }
            })
            .collect();

        // 按字节读取: 单行编码错误只影响该行
        let mut index = 0usize;
        for result in reader.byte_records() {
            let row = result?;
            let mut record = SourceRecord::new(index);
            for (col_idx, bytes) in row.iter().enumerate() {
                let Some(header) = headers.get(col_idx) else {
                    continue;
                };
                match std::str::from_utf8(bytes) {
                    Ok(value) => record.push(header.clone(), value.trim()),
                    Err(_) => {
                        record.mark_defect(format!(
                            "第 {} 列 ({}) 不是有效的 UTF-8 文本",
                            col_idx + 1,
                            header
                        ));
                        record.push(header.clone(), String::from_utf8_lossy(bytes).trim());
                    }
                }
            }

            // 跳过完全空白的行
            if record.is_blank() {
                continue;
            }

            index += 1;
            if visit(record).is_break() {
                break;
            }
        }

        Ok(())
    }
}

impl SourceParser for CsvSourceParser {
    fn read_batch(
        &self,
        source: &SourceDescriptor,
        offset: usize,
        limit: usize,
    ) -> ImportResult<SourceBatch> {
        read_window(offset, limit, |visit| self.scan(source, visit))
    }

    fn structure_catalog(
        &self,
        source: &SourceDescriptor,
        sample_limit: usize,
    ) -> ImportResult<StructureCatalog> {
        build_catalog(sample_limit, |visit| self.scan(source, visit))
    }
}

// ==========================================
// XML Parser 实现
// ==========================================
// 路径规则:
// - 相对记录容器元素,子元素以 / 连接（如 images/image）
// - 属性为 path/@attr,容器自身属性为 @attr
// - 重复节点按出现顺序全部保留
pub struct XmlSourceParser;

struct XmlFrame {
    path: String,
    text: String,
    has_children: bool,
}

struct XmlRecordBuilder {
    record: SourceRecord,
    root_depth: usize,
    stack: Vec<XmlFrame>,
}

impl XmlRecordBuilder {
    fn new(index: usize, root_depth: usize, container: &BytesStart) -> ImportResult<Self> {
        let mut builder = Self {
            record: SourceRecord::new(index),
            root_depth,
            stack: Vec::new(),
        };
        builder.push_attributes(None, container)?;
        Ok(builder)
    }

    fn push_attributes(&mut self, path: Option<&str>, element: &BytesStart) -> ImportResult<()> {
        for attr in element.attributes() {
            let attr = attr.map_err(|e| ImportError::XmlParseError {
                position: 0,
                message: e.to_string(),
            })?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
            let value = attr.unescape_value()?.trim().to_string();
            let attr_path = match path {
                Some(p) => format!("{}/@{}", p, key),
                None => format!("@{}", key),
            };
            self.record.push(attr_path, value);
        }
        Ok(())
    }

    fn open(&mut self, element: &BytesStart) -> ImportResult<()> {
        let name = element_name(element);
        if let Some(parent) = self.stack.last_mut() {
            parent.has_children = true;
        }
        let path = match self.stack.last() {
            Some(parent) => format!("{}/{}", parent.path, name),
            None => name,
        };
        self.push_attributes(Some(&path), element)?;
        self.stack.push(XmlFrame {
            path,
            text: String::new(),
            has_children: false,
        });
        Ok(())
    }

    fn text(&mut self, text: &str) {
        if let Some(frame) = self.stack.last_mut() {
            frame.text.push_str(text);
        }
    }

    fn close(&mut self) {
        if let Some(frame) = self.stack.pop() {
            // 纯容器节点不产生值; 叶子节点即使为空也登记路径
            if !frame.has_children || !frame.text.trim().is_empty() {
                self.record.push(frame.path, frame.text.trim());
            }
        }
    }

    fn finish(self) -> SourceRecord {
        self.record
    }
}

fn element_name(element: &BytesStart) -> String {
    String::from_utf8_lossy(element.name().as_ref()).to_string()
}

/// 记录容器判定: 指定容器名时按名称匹配,否则取根元素的直接子元素
fn is_container(source: &SourceDescriptor, name: &str, depth: usize) -> bool {
    match source.container.as_deref() {
        Some(container) => container == name,
        None => depth == 2,
    }
}

impl XmlSourceParser {
    fn scan(
        &self,
        source: &SourceDescriptor,
        visit: &mut dyn FnMut(SourceRecord) -> ControlFlow<()>,
    ) -> ImportResult<()> {
        let path = Path::new(&source.file_path);
        ensure_exists(path)?;

        let file = File::open(path)?;
        let mut reader = Reader::from_reader(BufReader::new(file));
        reader.trim_text(true);

        let mut buf = Vec::new();
        let mut depth = 0usize;
        let mut index = 0usize;
        let mut builder: Option<XmlRecordBuilder> = None;

        loop {
            let event = reader
                .read_event_into(&mut buf)
                .map_err(|e| ImportError::XmlParseError {
                    position: reader.buffer_position(),
                    message: e.to_string(),
                })?;

            let mut completed: Option<SourceRecord> = None;
            match event {
                Event::Start(e) => {
                    depth += 1;
                    match builder.as_mut() {
                        Some(b) => b.open(&e)?,
                        None if is_container(source, &element_name(&e), depth) => {
                            builder = Some(XmlRecordBuilder::new(index, depth, &e)?);
                        }
                        None => {}
                    }
                }
                Event::Empty(e) => match builder.as_mut() {
                    Some(b) => {
                        b.open(&e)?;
                        b.close();
                    }
                    None if is_container(source, &element_name(&e), depth + 1) => {
                        completed = Some(XmlRecordBuilder::new(index, depth + 1, &e)?.finish());
                    }
                    None => {}
                },
                Event::Text(t) => {
                    if let Some(b) = builder.as_mut() {
                        b.text(&t.unescape()?);
                    }
                }
                Event::CData(c) => {
                    if let Some(b) = builder.as_mut() {
                        b.text(&String::from_utf8_lossy(&c.into_inner()));
                    }
                }
                Event::End(_) => {
                    let closes_record = builder
                        .as_ref()
                        .map(|b| b.root_depth == depth)
                        .unwrap_or(false);
                    if closes_record {
                        completed = builder.take().map(XmlRecordBuilder::finish);
                    } else if let Some(b) = builder.as_mut() {
                        b.close();
                    }
                    depth = depth.saturating_sub(1);
                }
                Event::Eof => break,
                _ => {}
            }
            buf.clear();

            if let Some(record) = completed {
                if record.is_blank() {
                    continue;
                }
                index += 1;
                if visit(record).is_break() {
                    break;
                }
            }
        }

        Ok(())
    }
}

impl SourceParser for XmlSourceParser {
    fn read_batch(
        &self,
        source: &SourceDescriptor,
        offset: usize,
        limit: usize,
    ) -> ImportResult<SourceBatch> {
        read_window(offset, limit, |visit| self.scan(source, visit))
    }

    fn structure_catalog(
        &self,
        source: &SourceDescriptor,
        sample_limit: usize,
    ) -> ImportResult<StructureCatalog> {
        build_catalog(sample_limit, |visit| self.scan(source, visit))
    }
}

// ==========================================
// 通用源解析器（根据源格式选择）
// ==========================================
pub struct UniversalSourceParser;

impl UniversalSourceParser {
    /// 根据扩展名推断源格式
    pub fn detect_format<P: AsRef<Path>>(file_path: P) -> ImportResult<SourceFormat> {
        let ext = file_path
            .as_ref()
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();

        match ext.as_str() {
            "csv" | "tsv" | "txt" => Ok(SourceFormat::Csv),
            "xml" => Ok(SourceFormat::Xml),
            _ => Err(ImportError::UnsupportedFormat(ext)),
        }
    }

    fn parser_for(format: SourceFormat) -> &'static dyn SourceParser {
        match format {
            SourceFormat::Csv => &CsvSourceParser,
            SourceFormat::Xml => &XmlSourceParser,
        }
    }
}

impl SourceParser for UniversalSourceParser {
    fn read_batch(
        &self,
        source: &SourceDescriptor,
        offset: usize,
        limit: usize,
    ) -> ImportResult<SourceBatch> {
        Self::parser_for(source.format).read_batch(source, offset, limit)
    }

    fn structure_catalog(
        &self,
        source: &SourceDescriptor,
        sample_limit: usize,
    ) -> ImportResult<StructureCatalog> {
        Self::parser_for(source.format).structure_catalog(source, sample_limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn descriptor(file: &NamedTempFile, format: SourceFormat, container: Option<&str>) -> SourceDescriptor {
        SourceDescriptor {
            file_path: file.path().to_string_lossy().to_string(),
            format,
            container: container.map(str::to_string),
            delimiter: None,
        }
    }

    #[test]
    fn test_csv_read_batch_windows_and_skips_blank_rows() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "sku,title,price").unwrap();
        writeln!(temp_file, "A1, Shirt ,10").unwrap();
        writeln!(temp_file, ",,").unwrap();
        writeln!(temp_file, "A2,Hat,5").unwrap();
        writeln!(temp_file, "A3,Scarf,7").unwrap();
        temp_file.flush().unwrap();

        let source = descriptor(&temp_file, SourceFormat::Csv, None);
        let parser = CsvSourceParser;

        let first = parser.read_batch(&source, 0, 2).unwrap();
        assert_eq!(first.read_count(), 2);
        assert!(!first.exhausted);
        assert_eq!(first.records[0].flat("title"), "Shirt");
        assert_eq!(first.records[1].flat("sku"), "A2");
        assert_eq!(first.records[1].index, 1);

        let second = parser.read_batch(&source, 2, 2).unwrap();
        assert_eq!(second.read_count(), 1);
        assert!(second.exhausted);
        assert_eq!(second.records[0].flat("sku"), "A3");
    }

    #[test]
    fn test_csv_invalid_utf8_row_is_marked_not_fatal() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"sku,title\nA1,Shirt\nA2,Bad \xff\xfe\nA3,Scarf\n").unwrap();
        temp_file.flush().unwrap();

        let source = descriptor(&temp_file, SourceFormat::Csv, None);
        let batch = CsvSourceParser.read_batch(&source, 0, 10).unwrap();
        assert_eq!(batch.read_count(), 3);
        assert!(batch.exhausted);
        assert!(batch.records[0].defect().is_none());
        assert_eq!(batch.records[1].flat("sku"), "A2");
        assert!(batch.records[1].defect().unwrap().contains("title"));
        assert_eq!(batch.records[2].flat("title"), "Scarf");
    }

    #[test]
    fn test_csv_missing_file() {
        let source = SourceDescriptor {
            file_path: "/nonexistent/feed.csv".to_string(),
            format: SourceFormat::Csv,
            container: None,
            delimiter: None,
        };
        let result = CsvSourceParser.read_batch(&source, 0, 10);
        assert!(matches!(result, Err(ImportError::FileNotFound(_))));
    }

    #[test]
    fn test_xml_paths_attributes_and_repeats() {
        let mut temp_file = NamedTempFile::new().unwrap();
        write!(
            temp_file,
            r#"<?xml version="1.0"?>
<catalog>
  <product id="p1">
    <sku>A1</sku>
    <title><![CDATA[Shirt & Tie]]></title>
    <images><image>1.jpg</image><image>2.jpg</image></images>
    <price currency="EUR">19.90</price>
    <empty/>
  </product>
  <product id="p2"><sku>A2</sku></product>
</catalog>"#
        )
        .unwrap();
        temp_file.flush().unwrap();

        let source = descriptor(&temp_file, SourceFormat::Xml, Some("product"));
        let batch = XmlSourceParser.read_batch(&source, 0, 10).unwrap();
        assert_eq!(batch.read_count(), 2);
        assert!(batch.exhausted);

        let first = &batch.records[0];
        assert_eq!(first.flat("@id"), "p1");
        assert_eq!(first.flat("sku"), "A1");
        assert_eq!(first.flat("title"), "Shirt & Tie");
        assert_eq!(first.values("images/image"), &["1.jpg".to_string(), "2.jpg".to_string()]);
        assert_eq!(first.flat("price/@currency"), "EUR");
        assert!(first.contains("empty"));
        assert!(!first.contains("images"));

        let tail = XmlSourceParser.read_batch(&source, 1, 10).unwrap();
        assert_eq!(tail.records[0].flat("sku"), "A2");
        assert_eq!(tail.records[0].index, 1);
    }

    #[test]
    fn test_xml_default_container_is_root_child() {
        let mut temp_file = NamedTempFile::new().unwrap();
        write!(temp_file, "<rows><row><a>1</a></row><row><a>2</a></row></rows>").unwrap();
        temp_file.flush().unwrap();

        let source = descriptor(&temp_file, SourceFormat::Xml, None);
        let catalog = UniversalSourceParser.structure_catalog(&source, 5).unwrap();
        assert_eq!(catalog.record_count, 2);
        assert_eq!(catalog.samples("a"), &["1".to_string(), "2".to_string()]);
    }

    #[test]
    fn test_detect_format() {
        assert_eq!(UniversalSourceParser::detect_format("feed.XML").unwrap(), SourceFormat::Xml);
        assert_eq!(UniversalSourceParser::detect_format("feed.csv").unwrap(), SourceFormat::Csv);
        assert!(UniversalSourceParser::detect_format("feed.xlsx").is_err());
    }
}
