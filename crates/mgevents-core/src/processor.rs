//! Streams the provider's daily account activity export into a listener.
//!
//! Export files can run to several gigabytes, so the document is never loaded
//! as a tree. A pull parser walks it once, and the XML of the activity element
//! currently being read is rebuilt from the parser events. When the element
//! closes, that fragment is deserialized on its own and dispatched before the
//! next one is read. The fragment is re-rooted with the document's namespace
//! so it stands alone.

use std::borrow::Cow;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::time::{Duration, Instant};

use log::{debug, info};
use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::activity::{ActivityCounts, ActivityKind};
use crate::error::Result;
use crate::listener::{dispatch, ActivityListener};

/// Replays an account activity export into an [`ActivityListener`].
///
/// A processor can be reused for any number of files, one at a time. Counts
/// start from zero on every call to [`process`](Self::process).
///
/// # Example
///
/// ```no_run
/// use mgevents::ActivityFileProcessor;
/// # use mgevents::ActivityListener;
///
/// # fn example(listener: impl ActivityListener) -> mgevents::Result<()> {
/// let mut processor = ActivityFileProcessor::new(listener);
/// let counts = processor.process("activity-2024-03-01.xml")?;
/// println!("{} activities", counts.total());
/// # Ok(())
/// # }
/// ```
pub struct ActivityFileProcessor<L> {
    listener: L,
    counts: ActivityCounts,
}

impl<L: ActivityListener> ActivityFileProcessor<L> {
    pub fn new(listener: L) -> Self {
        Self {
            listener,
            counts: ActivityCounts::default(),
        }
    }

    pub fn listener(&self) -> &L {
        &self.listener
    }

    pub fn into_listener(self) -> L {
        self.listener
    }

    /// Counts from the most recent pass.
    pub fn counts(&self) -> ActivityCounts {
        self.counts
    }

    /// Streams the export at `path` through the listener.
    ///
    /// # Returns
    ///
    /// Per-kind counts of the records dispatched in this pass.
    ///
    /// # Errors
    ///
    /// * [`Error::Io`](crate::Error::Io) if the file cannot be opened
    /// * [`Error::Xml`](crate::Error::Xml) on malformed XML or a failed read
    /// * [`Error::Decode`](crate::Error::Decode) if an activity lacks a
    ///   required field
    /// * [`Error::Listener`](crate::Error::Listener) if a callback fails
    pub fn process(&mut self, path: impl AsRef<Path>) -> Result<ActivityCounts> {
        let path = path.as_ref();
        debug!("starting account activity file processor on {}", path.display());
        let file = File::open(path)?;
        self.process_reader(BufReader::new(file))
    }

    /// Parses an export from any buffered source.
    ///
    /// Malformed XML, an activity that fails to deserialize, or a listener
    /// error aborts the pass. Everything dispatched before that point stays
    /// dispatched.
    pub fn process_reader<R: BufRead>(&mut self, source: R) -> Result<ActivityCounts> {
        self.counts = ActivityCounts::default();
        let started = Instant::now();

        // no trim_text: text beside CDATA keeps its spacing
        let mut reader = Reader::from_reader(source);

        let mut buf = Vec::new();
        let mut fragment = FragmentBuilder::default();

        loop {
            match reader.read_event_into(&mut buf)? {
                Event::Start(e) => fragment.start(&e)?,
                Event::Empty(e) => {
                    if let Some(complete) = fragment.empty(&e)? {
                        self.emit(complete)?;
                    }
                }
                Event::Text(e) => fragment.text(&e.unescape()?),
                Event::CData(e) => fragment.text(&String::from_utf8_lossy(&e.into_inner())),
                Event::End(e) => {
                    let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                    if let Some(complete) = fragment.end(&name) {
                        self.emit(complete)?;
                    }
                }
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }

        info!(
            "account activity file processor finished in {} (total/o/c/b/d/je/re/sc/u): {}",
            hms(started.elapsed()),
            self.counts
        );
        Ok(self.counts)
    }

    fn emit(&mut self, (kind, xml): (ActivityKind, String)) -> Result<()> {
        debug!("an activity was found: {xml}");
        let record = kind.parse_fragment(&xml)?;
        debug!("{kind} belongs to job {}", record.request_id());
        dispatch(&self.listener, record)?;
        self.counts.increment(kind);
        Ok(())
    }
}

/// Rebuilds the text of one activity element at a time.
#[derive(Default)]
struct FragmentBuilder {
    root_seen: bool,
    namespace: Option<String>,
    current: Option<String>,
}

impl FragmentBuilder {
    fn start(&mut self, e: &BytesStart) -> Result<()> {
        if !self.root_seen {
            self.root_seen = true;
            self.namespace = root_namespace(e)?;
            debug!("using namespace: {:?}", self.namespace);
            return Ok(());
        }

        let name = local_name(e);
        if ActivityKind::from_element_name(&name).is_some() {
            self.current = Some(self.open_tag(&name, ">"));
        } else if let Some(xml) = self.current.as_mut() {
            xml.push('<');
            xml.push_str(&name);
            xml.push('>');
        }
        Ok(())
    }

    fn empty(&mut self, e: &BytesStart) -> Result<Option<(ActivityKind, String)>> {
        if !self.root_seen {
            // a self-closing root: an export with no activity at all
            self.root_seen = true;
            self.namespace = root_namespace(e)?;
            return Ok(None);
        }

        let name = local_name(e);
        if let Some(kind) = ActivityKind::from_element_name(&name) {
            self.current = None;
            return Ok(Some((kind, self.open_tag(&name, "/>"))));
        }
        if let Some(xml) = self.current.as_mut() {
            xml.push('<');
            xml.push_str(&name);
            xml.push_str("/>");
        }
        Ok(None)
    }

    fn text(&mut self, text: &str) {
        if let Some(xml) = self.current.as_mut() {
            xml.push_str(&escape(text));
        }
    }

    fn end(&mut self, name: &str) -> Option<(ActivityKind, String)> {
        let xml = self.current.as_mut()?;
        xml.push_str("</");
        xml.push_str(name);
        xml.push('>');

        let kind = ActivityKind::from_element_name(name)?;
        self.current.take().map(|xml| (kind, xml))
    }

    fn open_tag(&self, name: &str, close: &str) -> String {
        match &self.namespace {
            Some(ns) => format!(r#"<{name} xmlns="{}"{close}"#, escape(ns.as_str())),
            None => format!("<{name}{close}"),
        }
    }
}

fn local_name<'a>(e: &'a BytesStart) -> Cow<'a, str> {
    String::from_utf8_lossy(e.local_name().into_inner())
}

/// The root's `xmlns`, or failing that its first attribute.
fn root_namespace(e: &BytesStart) -> Result<Option<String>> {
    let mut first = None;
    for attr in e.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        let value = attr.unescape_value()?.into_owned();
        if attr.key.as_ref() == b"xmlns" {
            return Ok(Some(value));
        }
        first.get_or_insert(value);
    }
    Ok(first)
}

fn hms(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, secs / 60 % 60, secs % 60)
}
