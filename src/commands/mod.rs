//! Pipeline steps and the pipeline that chains them.
//!
//! A step consumes one row at a time and emits zero or more rows into an
//! [`Emitter`]. Steps may buffer rows and release them in `finish`, and may
//! ask the pipeline to stop early. A [`Pipeline`] pulls rows from its source
//! through every step and is itself a [`RowSource`].

pub mod collect;
pub mod columns;
pub mod expand;
pub mod filter;
pub mod generate;
pub mod group;
pub mod join;
pub mod segments;
pub mod sort;
pub mod tee;
pub mod varjoin;
pub mod write;

pub use collect::CollectStep;
pub use columns::{CalcStep, HideStep, RenameStep, SelectStep, SetColTypeStep};
pub use expand::{SplitStep, UnpivotStep};
pub use filter::{
    DistinctStep, RowNumStep, SkipStep, ThrowIfStep, TopStep, UntilStep, VerifyOrderStep,
    WhereStep,
};
pub use generate::{gorrow_source, GorRowsSource, NorRowsSource};
pub use group::{GroupStep, GroupWindow};
pub use join::{JoinKind, JoinStep};
pub use segments::{SegHistStep, SegProjStep, SegSpanStep};
pub use sort::SortStep;
pub use tee::{ChannelSource, MergeStep, TeeStep};
pub use varjoin::VarJoinStep;
pub use write::WriteStep;

use crate::genome::ChromOrder;
use crate::gor::{GorError, Result};
use crate::query::parser::CommandLine;
use crate::query::Session;
use crate::row::{Header, Row};
use crate::streaming::{BoxedSource, GorWriter, RowSource};
use log::debug;
use std::cmp::Ordering;
use std::collections::VecDeque;
use std::fmt;
use std::io::Write;
use std::sync::Arc;

/// Rows produced by one step invocation.
#[derive(Debug, Default)]
pub struct Emitter {
    rows: Vec<Row>,
    stop: bool,
}

impl Emitter {
    #[inline]
    pub fn emit(&mut self, row: Row) {
        self.rows.push(row);
    }

    /// Ask the pipeline to stop feeding this step.
    pub fn stop(&mut self) {
        self.stop = true;
    }

    pub fn is_stopped(&self) -> bool {
        self.stop
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn take(&mut self) -> Vec<Row> {
        std::mem::take(&mut self.rows)
    }
}

/// One transformation of a pipeline.
pub trait Step: Send {
    /// Header of the rows this step emits.
    fn header(&self) -> &Header;

    fn process(&mut self, row: Row, out: &mut Emitter) -> Result<()>;

    /// Called once after the last input row.
    fn finish(&mut self, _out: &mut Emitter) -> Result<()> {
        Ok(())
    }

    /// Release resources; called on early stop and on error.
    fn close(&mut self) {}
}

/// Build the step for one pipeline command.
pub fn build_step(line: &CommandLine, input: &Header, session: &Session) -> Result<Box<dyn Step>> {
    let step: Box<dyn Step> = match line.name() {
        "where" => Box::new(WhereStep::from_command(line, input, false)?),
        "trywhere" => Box::new(WhereStep::from_command(line, input, true)?),
        "throwif" => Box::new(ThrowIfStep::from_command(line, input)?),
        "until" => Box::new(UntilStep::from_command(line, input)?),
        "top" => Box::new(TopStep::from_command(line, input)?),
        "skip" => Box::new(SkipStep::from_command(line, input)?),
        "distinct" => Box::new(DistinctStep::from_command(line, input)?),
        "verifyorder" => Box::new(VerifyOrderStep::from_command(line, input, session.order())?),
        "rownum" => Box::new(RowNumStep::from_command(line, input)?),
        "select" => Box::new(SelectStep::from_command(line, input, false)?),
        "tryselect" => Box::new(SelectStep::from_command(line, input, true)?),
        "hide" => Box::new(HideStep::from_command(line, input, false)?),
        "tryhide" => Box::new(HideStep::from_command(line, input, true)?),
        "rename" => Box::new(RenameStep::from_command(line, input)?),
        "calc" => Box::new(CalcStep::from_command(line, input)?),
        "setcoltype" => Box::new(SetColTypeStep::from_command(line, input)?),
        "split" => Box::new(SplitStep::from_command(line, input)?),
        "unpivot" => Box::new(UnpivotStep::from_command(line, input)?),
        "group" => Box::new(GroupStep::from_command(line, input, session.genome().clone())?),
        "sort" => Box::new(SortStep::from_command(line, input, session.order())?),
        "collect" => Box::new(CollectStep::from_command(line, input)?),
        "join" => Box::new(JoinStep::from_command(line, input, session)?),
        "varjoin" => Box::new(VarJoinStep::from_command(line, input, session)?),
        "segspan" => Box::new(SegSpanStep::from_command(line, input)?),
        "segproj" => Box::new(SegProjStep::from_command(line, input)?),
        "seghist" => Box::new(SegHistStep::from_command(line, input)?),
        "tee" => Box::new(TeeStep::from_command(line, input, session)?),
        "merge" => Box::new(MergeStep::from_command(line, input, session)?),
        "write" => Box::new(WriteStep::from_command(line, input, session)?),
        other => return Err(GorError::parse(other, "Unknown command")),
    };
    debug!("Built step {}", line.name());
    Ok(step)
}

/// Resolve a column specification or fail with a parse error naming the
/// command and the missing column.
pub(crate) fn resolve_columns(header: &Header, spec: &str, command: &str) -> Result<Vec<usize>> {
    header
        .resolve(spec)
        .map_err(|item| GorError::parse(command, format!("Column {} not found", item)))
}

/// Lifecycle of a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Open,
    Active,
    Finished,
    Closed,
}

/// Counters reported after running a pipeline to completion.
#[derive(Debug, Default, Clone)]
pub struct PipelineStats {
    pub rows_out: u64,
    pub steps: usize,
}

impl fmt::Display for PipelineStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "steps={}, rows_out={}", self.steps, self.rows_out)
    }
}

/// A source followed by a chain of steps.
pub struct Pipeline {
    source: BoxedSource,
    steps: Vec<Box<dyn Step>>,
    header: Header,
    order: Arc<ChromOrder>,
    ready: VecDeque<Row>,
    state: State,
    stopped_at: Option<usize>,
    floor: Option<(String, u64)>,
}

impl Pipeline {
    pub fn new(source: BoxedSource, order: Arc<ChromOrder>) -> Self {
        let header = source.header().clone();
        Self {
            source,
            steps: Vec::new(),
            header,
            order,
            ready: VecDeque::new(),
            state: State::Open,
            stopped_at: None,
            floor: None,
        }
    }

    /// Append a step; the pipeline header becomes the step's header.
    pub fn push_step(&mut self, step: Box<dyn Step>) {
        self.header = step.header().clone();
        self.steps.push(step);
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Feed `rows` to the steps starting at `start`.
    fn run_steps(&mut self, start: usize, rows: Vec<Row>) -> Result<()> {
        let mut batch = rows;
        for i in start..self.steps.len() {
            if batch.is_empty() {
                return Ok(());
            }
            let mut out = Emitter::default();
            for row in batch {
                self.steps[i].process(row, &mut out)?;
                if out.stop {
                    break;
                }
            }
            if out.stop {
                self.stopped_at = Some(self.stopped_at.map_or(i, |s| s.max(i)));
            }
            batch = out.rows;
        }
        self.ready.extend(batch);
        Ok(())
    }

    /// Call `finish` on the steps from `from` on, in order.
    fn finish_from(&mut self, from: usize) -> Result<()> {
        let mut next = from;
        while next < self.steps.len() {
            let mut out = Emitter::default();
            self.steps[next].finish(&mut out)?;
            if out.stop {
                self.stopped_at = Some(self.stopped_at.map_or(next, |s| s.max(next)));
            }
            let rows = out.rows;
            self.run_steps(next + 1, rows)?;
            next = match self.stopped_at {
                Some(s) if s >= next => s + 1,
                _ => next + 1,
            };
        }
        Ok(())
    }

    fn close_upstream(&mut self, through: usize) {
        self.source.close();
        for step in self.steps.iter_mut().take(through + 1) {
            step.close();
        }
    }

    fn fill(&mut self) -> Result<()> {
        if self.state == State::Open {
            self.state = State::Active;
        }
        while self.ready.is_empty() && self.state == State::Active {
            if let Some(stop) = self.stopped_at {
                self.close_upstream(stop);
                self.state = State::Finished;
                self.finish_from(stop + 1)?;
                break;
            }
            match self.source.next_opt()? {
                Some(row) => self.run_steps(0, vec![row])?,
                None => {
                    self.state = State::Finished;
                    self.source.close();
                    self.finish_from(0)?;
                }
            }
        }
        self.apply_floor();
        Ok(())
    }

    fn apply_floor(&mut self) {
        let Some((chrom, pos)) = &self.floor else {
            return;
        };
        while let Some(row) = self.ready.front() {
            if self.order.cmp_key(row.chrom(), row.pos(), chrom, *pos) != Ordering::Less {
                break;
            }
            self.ready.pop_front();
        }
    }

    fn guarded<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        match f(self) {
            Ok(v) => Ok(v),
            Err(e) => {
                self.close();
                Err(e)
            }
        }
    }

    /// Drain the pipeline into `writer`, header first.
    pub fn run<W: Write>(mut self, writer: &mut GorWriter<W>) -> Result<PipelineStats> {
        let header = self.header.clone();
        writer.write_header(&header)?;
        let mut stats = PipelineStats {
            rows_out: 0,
            steps: self.steps.len(),
        };
        while self.has_next()? {
            let row = self.next_row()?;
            writer.write_row(&row)?;
            stats.rows_out += 1;
        }
        writer.flush()?;
        self.close();
        Ok(stats)
    }
}

impl RowSource for Pipeline {
    fn header(&self) -> &Header {
        &self.header
    }

    fn has_next(&mut self) -> Result<bool> {
        if self.state == State::Closed {
            return Ok(false);
        }
        if self.ready.is_empty() {
            self.guarded(|p| p.fill())?;
        }
        Ok(!self.ready.is_empty())
    }

    fn next_row(&mut self) -> Result<Row> {
        if !self.has_next()? {
            return Err(GorError::system("next_row called on an exhausted pipeline"));
        }
        self.ready
            .pop_front()
            .ok_or_else(|| GorError::system("next_row called on an exhausted pipeline"))
    }

    fn seek(&mut self, chrom: &str, pos: u64) -> Result<()> {
        if self.state == State::Open {
            self.guarded(|p| p.source.seek(chrom, pos))?;
        }
        self.floor = Some((chrom.to_string(), pos));
        self.apply_floor();
        Ok(())
    }

    fn close(&mut self) {
        if self.state == State::Closed {
            return;
        }
        self.state = State::Closed;
        self.ready.clear();
        self.source.close();
        for step in self.steps.iter_mut() {
            step.close();
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::streaming::VecSource;

    pub fn header(names: &[&str]) -> Header {
        Header::from_names(names)
    }

    pub fn row(chrom: &str, pos: u64, rest: &[&str]) -> Row {
        Row::from_parts(chrom, pos, rest.iter().map(|s| s.to_string()))
    }

    pub fn source(names: &[&str], rows: Vec<Row>) -> BoxedSource {
        Box::new(VecSource::new(
            header(names),
            rows,
            Arc::new(ChromOrder::default()),
        ))
    }

    /// Run rows through one step, returning the emitted rows.
    pub fn run_step(step: &mut dyn Step, rows: Vec<Row>) -> Result<Vec<Row>> {
        let mut out = Emitter::default();
        for row in rows {
            step.process(row, &mut out)?;
            if out.is_stopped() {
                break;
            }
        }
        step.finish(&mut out)?;
        Ok(out.take())
    }

    pub fn cells(rows: &[Row]) -> Vec<String> {
        rows.iter().map(|r| r.to_line()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::streaming::collect_rows;

    /// Emits every row twice and stops after `limit` inputs.
    struct Doubler {
        header: Header,
        seen: usize,
        limit: usize,
    }

    impl Step for Doubler {
        fn header(&self) -> &Header {
            &self.header
        }

        fn process(&mut self, row: Row, out: &mut Emitter) -> Result<()> {
            out.emit(row.clone());
            out.emit(row);
            self.seen += 1;
            if self.seen >= self.limit {
                out.stop();
            }
            Ok(())
        }
    }

    /// Buffers rows and releases them in finish.
    struct Holder {
        header: Header,
        held: Vec<Row>,
    }

    impl Step for Holder {
        fn header(&self) -> &Header {
            &self.header
        }

        fn process(&mut self, row: Row, _out: &mut Emitter) -> Result<()> {
            self.held.push(row);
            Ok(())
        }

        fn finish(&mut self, out: &mut Emitter) -> Result<()> {
            for row in self.held.drain(..) {
                out.emit(row);
            }
            Ok(())
        }
    }

    fn rows(n: u64) -> Vec<Row> {
        (1..=n).map(|p| row("chr1", p, &[])).collect()
    }

    #[test]
    fn test_pipeline_runs_steps_in_order() {
        let mut p = Pipeline::new(source(&["Chrom", "Pos"], rows(3)), Arc::new(ChromOrder::default()));
        p.push_step(Box::new(Doubler {
            header: header(&["Chrom", "Pos"]),
            seen: 0,
            limit: 100,
        }));
        p.push_step(Box::new(Holder {
            header: header(&["Chrom", "Pos"]),
            held: Vec::new(),
        }));
        let out = collect_rows(&mut p).unwrap();
        assert_eq!(out.len(), 6);
    }

    #[test]
    fn test_early_stop_finishes_downstream() {
        let mut p = Pipeline::new(source(&["Chrom", "Pos"], rows(10)), Arc::new(ChromOrder::default()));
        p.push_step(Box::new(Doubler {
            header: header(&["Chrom", "Pos"]),
            seen: 0,
            limit: 2,
        }));
        p.push_step(Box::new(Holder {
            header: header(&["Chrom", "Pos"]),
            held: Vec::new(),
        }));
        let out = collect_rows(&mut p).unwrap();
        assert_eq!(out.len(), 4);
    }

    #[test]
    fn test_seek_before_start() {
        let mut p = Pipeline::new(source(&["Chrom", "Pos"], rows(5)), Arc::new(ChromOrder::default()));
        p.seek("chr1", 4).unwrap();
        let out = collect_rows(&mut p).unwrap();
        assert_eq!(cells(&out), vec!["chr1\t4", "chr1\t5"]);
    }

    #[test]
    fn test_run_writes_header_and_rows() {
        let p = Pipeline::new(source(&["Chrom", "Pos"], rows(2)), Arc::new(ChromOrder::default()));
        let mut writer = GorWriter::new(Vec::new());
        let stats = p.run(&mut writer).unwrap();
        assert_eq!(stats.rows_out, 2);
        let text = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        assert_eq!(text, "Chrom\tPos\nchr1\t1\nchr1\t2\n");
    }

    #[test]
    fn test_closed_pipeline_is_empty() {
        let mut p = Pipeline::new(source(&["Chrom", "Pos"], rows(5)), Arc::new(ChromOrder::default()));
        p.close();
        assert!(!p.has_next().unwrap());
        p.close();
    }
}
