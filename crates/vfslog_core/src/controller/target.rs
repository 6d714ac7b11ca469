//! Choosing how far one compaction step goes.

use crate::error::CoreResult;
use crate::oplog::{OperationFilter, OperationLog, OperationLogIterator, VfsOperation};

/// Picks the log position the next compaction step stops at.
///
/// Scans forward from `start` one unit at a time, where a unit is a single
/// operation or a whole event range, and accepts the first position that
/// either consumed more than `max_chunk_size` bytes of log or leaves at most
/// `tail_threshold` bytes behind it. A scan that reaches the end returns the
/// end position, including when the log ends inside an event range.
pub(crate) fn select_target(
    log: &dyn OperationLog,
    start: u64,
    max_chunk_size: u64,
    tail_threshold: u64,
) -> CoreResult<u64> {
    let begin = log.begin();
    let end = log.end();
    let mut iter = log.iterator_at(start.max(begin))?;

    loop {
        let Some(entry) = iter.next()? else {
            return Ok(iter.position());
        };
        if matches!(entry.operation, VfsOperation::EventStart { .. })
            && !skip_event_range(&mut *iter)?
        {
            return Ok(iter.position());
        }

        let candidate = iter.position();
        if candidate - begin > max_chunk_size || end - candidate <= tail_threshold {
            return Ok(candidate);
        }
    }
}

/// Moves past the end of the event range whose start was just read.
///
/// Returns false if the log ends first.
fn skip_event_range<I: OperationLogIterator + ?Sized>(iter: &mut I) -> CoreResult<bool> {
    let mut depth = 1usize;
    while let Some(entry) = iter.next()? {
        match entry.operation {
            VfsOperation::EventStart { .. } => depth += 1,
            VfsOperation::EventEnd => {
                depth -= 1;
                if depth == 0 {
                    return Ok(true);
                }
            }
            _ => {}
        }
    }
    Ok(false)
}

/// Finds how far the payload store can be truncated once the log is
/// truncated at `target`.
///
/// The floor is the offset of the first payload referenced at or after
/// `target`; with none, the end of the last payload referenced before it.
/// `None` if the retained log references no payload at all.
pub(crate) fn payload_floor(log: &dyn OperationLog, target: u64) -> CoreResult<Option<u64>> {
    let filter = OperationFilter::payload_carrying();

    let mut forward = log.iterator_at(target)?;
    if let Some(entry) = forward.next_matching(filter)? {
        return Ok(entry.operation.payload_ref().map(|p| p.offset));
    }

    let mut backward = log.iterator_at(target)?;
    if let Some(entry) = backward.previous_matching(filter)? {
        return Ok(entry.operation.payload_ref().map(|p| p.end()));
    }
    Ok(None)
}
