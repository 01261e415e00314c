//! Branching steps: `tee` copies the stream into a sub-pipeline running on
//! its own thread, `merge` interleaves a second ordered source.

use super::{Emitter, Pipeline, Step};
use crate::genome::ChromOrder;
use crate::gor::{GorError, Result};
use crate::query::parser::{split_pipes, sub_pipeline, CommandLine};
use crate::query::Session;
use crate::row::{Header, Row};
use crate::streaming::{BoxedSource, OrderValidator, PeekSource, RowSource};
use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, warn};
use std::cmp::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Row source fed through a channel; ends when every sender is dropped.
pub struct ChannelSource {
    header: Header,
    receiver: Option<Receiver<Row>>,
    peeked: Option<Row>,
    order: Arc<ChromOrder>,
}

impl ChannelSource {
    pub fn new(header: Header, receiver: Receiver<Row>, order: Arc<ChromOrder>) -> Self {
        Self {
            header,
            receiver: Some(receiver),
            peeked: None,
            order,
        }
    }
}

impl RowSource for ChannelSource {
    fn header(&self) -> &Header {
        &self.header
    }

    fn has_next(&mut self) -> Result<bool> {
        if self.peeked.is_none() {
            self.peeked = self.receiver.as_ref().and_then(|r| r.recv().ok());
        }
        Ok(self.peeked.is_some())
    }

    fn next_row(&mut self) -> Result<Row> {
        self.has_next()?;
        self.peeked
            .take()
            .ok_or_else(|| GorError::system("next_row called on a drained channel"))
    }

    fn seek(&mut self, chrom: &str, pos: u64) -> Result<()> {
        while self.has_next()? {
            let behind = self.peeked.as_ref().is_some_and(|row| {
                self.order.cmp_key(row.chrom(), row.pos(), chrom, pos) == Ordering::Less
            });
            if !behind {
                break;
            }
            self.peeked = None;
        }
        Ok(())
    }

    fn close(&mut self) {
        self.peeked = None;
        self.receiver = None;
    }
}

/// `tee >(pipeline)`.
///
/// Every row is passed on unchanged and a copy is queued for the
/// sub-pipeline. The queue is unbounded, so a slow branch never blocks the
/// main stream and never loses rows.
pub struct TeeStep {
    header: Header,
    sender: Option<Sender<Row>>,
    worker: Option<JoinHandle<Result<u64>>>,
}

impl TeeStep {
    pub fn from_command(line: &CommandLine, input: &Header, session: &Session) -> Result<Self> {
        let opts = line.options(&[], &[])?;
        let [target] = opts.positional() else {
            return Err(opts.error("Expected one sub-pipeline >(...)"));
        };
        let text = sub_pipeline(target)
            .ok_or_else(|| opts.error(format!("Expected >(...), got '{}'", target)))?;
        let (sender, receiver) = unbounded();
        let source = ChannelSource::new(input.clone(), receiver, session.order());
        let pipeline = session.build_pipeline(Box::new(source), &split_pipes(text)?)?;
        Self::spawn(input.clone(), sender, pipeline)
    }

    /// Run `pipeline` on a worker thread fed by `sender`.
    pub fn spawn(header: Header, sender: Sender<Row>, mut pipeline: Pipeline) -> Result<Self> {
        let worker = thread::Builder::new()
            .name("gorpipe-tee".into())
            .spawn(move || {
                let mut rows = 0u64;
                let result = (|| {
                    while pipeline.has_next()? {
                        pipeline.next_row()?;
                        rows += 1;
                    }
                    Ok(rows)
                })();
                pipeline.close();
                result
            })
            .map_err(|e| GorError::system(format!("Cannot start tee thread: {}", e)))?;
        Ok(Self {
            header,
            sender: Some(sender),
            worker: Some(worker),
        })
    }

    fn join(&mut self) -> Result<()> {
        self.sender = None;
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };
        match worker.join() {
            Ok(Ok(rows)) => {
                debug!("tee branch finished after {} rows", rows);
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(GorError::system("tee branch panicked")),
        }
    }
}

impl Step for TeeStep {
    fn header(&self) -> &Header {
        &self.header
    }

    fn process(&mut self, row: Row, out: &mut Emitter) -> Result<()> {
        if let Some(sender) = &self.sender {
            if sender.send(row.clone()).is_err() {
                // The branch stopped early; the main stream continues.
                self.sender = None;
            }
        }
        out.emit(row);
        Ok(())
    }

    fn finish(&mut self, _out: &mut Emitter) -> Result<()> {
        self.join()
    }

    fn close(&mut self) {
        if let Err(e) = self.join() {
            warn!("tee branch failed during close: {}", e);
        }
    }
}

/// `merge source`: interleave a second ordered stream with the pipeline.
///
/// On equal keys the pipeline row comes first.
pub struct MergeStep {
    header: Header,
    right: PeekSource,
    order: Arc<ChromOrder>,
    validator: OrderValidator,
}

impl MergeStep {
    pub fn from_command(line: &CommandLine, input: &Header, session: &Session) -> Result<Self> {
        let opts = line.options(&[], &[])?;
        let [target] = opts.positional() else {
            return Err(opts.error("Expected one source to merge"));
        };
        let right = session.open_source(target)?;
        Self::new(input, right, session.order()).map_err(|e| match e {
            GorError::Data { message } => opts.error(message),
            other => other,
        })
    }

    pub fn new(input: &Header, mut right: BoxedSource, order: Arc<ChromOrder>) -> Result<Self> {
        if !right.header().is_compatible(input) {
            let message = format!(
                "Cannot merge [{}] with [{}]",
                input.names().join(", "),
                right.header().names().join(", ")
            );
            right.close();
            return Err(GorError::data(message));
        }
        Ok(Self {
            header: input.clone(),
            right: PeekSource::new(right),
            validator: OrderValidator::new(order.clone(), "Merged source"),
            order,
        })
    }

    fn emit_right_before(&mut self, bound: Option<(&str, u64)>, out: &mut Emitter) -> Result<()> {
        loop {
            let due = match (self.right.peek()?, bound) {
                (None, _) => false,
                (Some(_), None) => true,
                (Some(r), Some((chrom, pos))) => {
                    self.order.cmp_key(r.chrom(), r.pos(), chrom, pos) == Ordering::Less
                }
            };
            if !due {
                return Ok(());
            }
            if let Some(row) = self.right.take()? {
                self.validator.validate_row(&row)?;
                out.emit(row);
            }
        }
    }
}

impl Step for MergeStep {
    fn header(&self) -> &Header {
        &self.header
    }

    fn process(&mut self, row: Row, out: &mut Emitter) -> Result<()> {
        self.emit_right_before(Some((row.chrom(), row.pos())), out)?;
        out.emit(row);
        Ok(())
    }

    fn finish(&mut self, out: &mut Emitter) -> Result<()> {
        self.emit_right_before(None, out)?;
        self.right.close();
        Ok(())
    }

    fn close(&mut self) {
        self.right.close();
    }
}
