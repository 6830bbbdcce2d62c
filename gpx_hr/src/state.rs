//! Two-state transformer that buffers each track point, merges a heart rate
//! into it and writes it back out through the [`Indenter`].

use std::io::Write;

use quick_xml::events::Event;
use tracing::debug;

use crate::indent::Indenter;
use crate::index::{ClosestSearch, HeartRateIndex};
use crate::splice::{ends, splice_heart_rate, starts, track_point_time, TRACK_POINT};
use crate::{HrError, Statistics};

#[derive(Debug, Default)]
pub enum TrackPointState {
    /// Events are forwarded as they arrive.
    #[default]
    Outside,
    /// Events of the current track point, starting with its start element.
    Inside(Vec<Event<'static>>),
}

impl TrackPointState {
    pub fn is_inside(&self) -> bool {
        matches!(self, TrackPointState::Inside(_))
    }
}

pub struct Merger<'a, W: Write, S> {
    state: TrackPointState,
    indenter: Indenter<W>,
    index: &'a mut HeartRateIndex<S>,
    untimed: u64,
}

impl<'a, W: Write, S: ClosestSearch> Merger<'a, W, S> {
    pub fn new(indenter: Indenter<W>, index: &'a mut HeartRateIndex<S>) -> Self {
        Self {
            state: TrackPointState::Outside,
            indenter,
            index,
            untimed: 0,
        }
    }

    pub fn state(&self) -> &TrackPointState {
        &self.state
    }

    /// Depth of the output written so far.
    pub fn depth(&self) -> usize {
        self.indenter.depth()
    }

    pub fn feed(&mut self, event: Event<'static>) -> Result<(), HrError> {
        self.state = match std::mem::take(&mut self.state) {
            TrackPointState::Outside if starts(&event, TRACK_POINT) => {
                TrackPointState::Inside(vec![event])
            }
            TrackPointState::Outside => {
                self.indenter.write(event)?;
                TrackPointState::Outside
            }
            TrackPointState::Inside(mut buffered) => {
                let closing = ends(&event, TRACK_POINT);
                buffered.push(event);
                if closing {
                    self.flush(buffered)?;
                    TrackPointState::Outside
                } else {
                    TrackPointState::Inside(buffered)
                }
            }
        };
        Ok(())
    }

    fn flush(&mut self, buffered: Vec<Event<'static>>) -> Result<(), HrError> {
        let events = match track_point_time(&buffered)? {
            None => {
                self.untimed += 1;
                debug!("track point without time, left unchanged");
                buffered
            }
            Some(at) => match self.index.lookup(at) {
                Some(rate) => {
                    debug!(%at, rate, "merging heart rate");
                    splice_heart_rate(buffered, rate)?
                }
                None => {
                    debug!(%at, "no heart rate within the acceptance window");
                    buffered
                }
            },
        };
        for event in events {
            self.indenter.write(event)?;
        }
        Ok(())
    }

    pub fn statistics(&self) -> Statistics {
        Statistics {
            succeeded: self.index.succeeded(),
            failed: self.index.failed(),
            untimed: self.untimed,
        }
    }

    /// Close the stream. Fails if it ended in the middle of a track point.
    pub fn finish(self) -> Result<(Statistics, W), HrError> {
        if self.state.is_inside() {
            return Err(HrError::MalformedInput(
                "document ended inside a track point".into(),
            ));
        }
        let statistics = self.statistics();
        Ok((statistics, self.indenter.into_inner()))
    }
}
