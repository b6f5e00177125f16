//! Destinations for generated fragments.

use std::io::Write;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::data::change::{FragmentRenderer, MigrationFragment};
use crate::error::Result;

/// Receives the text produced by a comparison run.
///
/// Writes come sequentially from the task driving the run.
pub trait FragmentSink: Send {
    /// Write header, footer or other free text
    fn write_text(&mut self, text: &str) -> Result<()>;

    /// Write one fragment; the default writes its rendered text
    fn write_fragment(&mut self, fragment: &MigrationFragment) -> Result<()> {
        self.write_text(&fragment.text)
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Writes the script to any `Write` (a file, stdout, a buffer)
pub struct ScriptSink<W: Write + Send> {
    writer: W,
}

impl<W: Write + Send> ScriptSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> FragmentSink for ScriptSink<W> {
    fn write_text(&mut self, text: &str) -> Result<()> {
        self.writer.write_all(text.as_bytes())?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MemorySinkState {
    text: String,
    fragments: Vec<MigrationFragment>,
}

/// Collects output in memory. Clones share the same buffer, so a caller
/// can keep one handle and give the other to a run.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    state: Arc<Mutex<MemorySinkState>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemorySinkState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Everything written so far, headers and footers included
    pub fn text(&self) -> String {
        self.lock().text.clone()
    }

    pub fn fragments(&self) -> Vec<MigrationFragment> {
        self.lock().fragments.clone()
    }

    pub fn fragment_count(&self) -> usize {
        self.lock().fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().text.is_empty()
    }
}

impl FragmentSink for MemorySink {
    fn write_text(&mut self, text: &str) -> Result<()> {
        self.lock().text.push_str(text);
        Ok(())
    }

    fn write_fragment(&mut self, fragment: &MigrationFragment) -> Result<()> {
        let mut state = self.lock();
        state.text.push_str(&fragment.text);
        state.fragments.push(fragment.clone());
        Ok(())
    }
}

/// One output stream of a run: writes the header before the first fragment
/// and the footer at the end, but only if the header was written.
pub struct OutputStream {
    sink: Box<dyn FragmentSink>,
    header_written: bool,
    footer_written: bool,
    fragments: u64,
}

impl OutputStream {
    pub fn new(sink: Box<dyn FragmentSink>) -> Self {
        Self {
            sink,
            header_written: false,
            footer_written: false,
            fragments: 0,
        }
    }

    pub fn write(&mut self, renderer: &FragmentRenderer, fragment: &MigrationFragment) -> Result<()> {
        if !self.header_written {
            let header = renderer.header();
            if !header.is_empty() {
                self.sink.write_text(&header)?;
            }
            self.header_written = true;
        }
        self.sink.write_fragment(fragment)?;
        self.fragments += 1;
        Ok(())
    }

    /// Write the footer (once) if anything was written, then flush
    pub fn finish(&mut self, renderer: &FragmentRenderer) -> Result<()> {
        if self.header_written && !self.footer_written {
            self.sink.write_text(&renderer.footer())?;
            self.footer_written = true;
        }
        self.sink.flush()
    }

    /// Forget header/footer state before the next table pair
    pub fn reset(&mut self) {
        self.header_written = false;
        self.footer_written = false;
        self.fragments = 0;
    }

    pub fn header_written(&self) -> bool {
        self.header_written
    }

    pub fn fragments_written(&self) -> u64 {
        self.fragments
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::change::{ColumnValue, Operation, OutputDialect, RowChange};
    use crate::data::literal::SqlLiteralFormatter;
    use crate::data::row::{ColumnDescriptor, TableIdentifier};
    use crate::data::value::Value;
    use crate::utils::naming::SqlDialect;
    use pretty_assertions::assert_eq;

    fn renderer() -> FragmentRenderer {
        FragmentRenderer::new(
            OutputDialect::Xml,
            SqlDialect::Sqlite,
            Operation::DeleteSync,
            TableIdentifier::new("t"),
            Arc::new(SqlLiteralFormatter::new(SqlDialect::Sqlite)),
        )
    }

    #[test]
    fn test_no_footer_without_header() {
        let sink = MemorySink::new();
        let mut stream = OutputStream::new(Box::new(sink.clone()));
        stream.finish(&renderer()).unwrap();
        assert!(sink.is_empty());
    }

    #[test]
    fn test_header_once_and_footer() {
        let r = renderer();
        let sink = MemorySink::new();
        let mut stream = OutputStream::new(Box::new(sink.clone()));

        for n in 1..=2 {
            let change = RowChange::delete(
                TableIdentifier::new("t"),
                vec![ColumnValue::new(ColumnDescriptor::new("id", "integer"), Value::Int(n))],
            );
            stream.write(&r, &r.render(change, n as u64).unwrap()).unwrap();
        }
        stream.finish(&r).unwrap();
        stream.finish(&r).unwrap();

        let text = sink.text();
        assert_eq!(text.matches("<?xml").count(), 1);
        assert_eq!(text.matches("</table-delete-sync>").count(), 1);
        assert_eq!(sink.fragment_count(), 2);
        assert_eq!(stream.fragments_written(), 2);
    }

    #[test]
    fn test_script_sink_writes_bytes() {
        let mut sink = ScriptSink::new(Vec::new());
        sink.write_text("SELECT 1;\n").unwrap();
        sink.flush().unwrap();
        assert_eq!(sink.into_inner(), b"SELECT 1;\n".to_vec());
    }
}
