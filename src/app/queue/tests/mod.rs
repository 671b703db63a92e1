//! Unit tests for the job queue

#[cfg(test)]
mod queue_tests {
    use super::super::*;
    use crate::app::models::{DownloadOutcome, DownloadRequest, FileHandle, ResourceClass};

    fn job(handle: i64, class: ResourceClass) -> (Job, DownloadTicket) {
        let (waiter, ticket) = DownloadTicket::channel(FileHandle(handle));
        (
            Job::new(DownloadRequest::new(FileHandle(handle), class), waiter),
            ticket,
        )
    }

    #[test]
    fn test_fifo_within_class() {
        let mut queue = JobQueue::new();
        for handle in 1..=3 {
            queue.enqueue(job(handle, ResourceClass::Thumb).0);
        }

        let order: Vec<_> = std::iter::from_fn(|| queue.take_next_startable(|_| true))
            .map(|job| job.handle())
            .collect();
        assert_eq!(order, vec![FileHandle(1), FileHandle(2), FileHandle(3)]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_blocked_class_does_not_block_other_class() {
        let mut queue = JobQueue::new();
        queue.enqueue(job(1, ResourceClass::Video).0);
        queue.enqueue(job(2, ResourceClass::Video).0);
        queue.enqueue(job(3, ResourceClass::Thumb).0);

        let next = queue
            .take_next_startable(|class| class == ResourceClass::Thumb)
            .unwrap();
        assert_eq!(next.handle(), FileHandle(3));
        assert_eq!(queue.depth(ResourceClass::Video), 2);
        assert_eq!(queue.depth(ResourceClass::Thumb), 0);
    }

    #[test]
    fn test_nothing_startable_returns_none() {
        let mut queue = JobQueue::new();
        queue.enqueue(job(1, ResourceClass::Video).0);
        assert!(queue.take_next_startable(|_| false).is_none());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_remove_counts_cancellation() {
        let mut queue = JobQueue::new();
        queue.enqueue(job(1, ResourceClass::Video).0);
        queue.enqueue(job(2, ResourceClass::Thumb).0);

        let removed = queue.remove(FileHandle(1)).unwrap();
        assert_eq!(removed.handle(), FileHandle(1));
        assert!(queue.remove(FileHandle(1)).is_none());

        let stats = queue.stats();
        assert_eq!(stats.total_cancelled, 1);
        assert_eq!(stats.video_pending, 0);
        assert_eq!(stats.thumb_pending, 1);
        assert_eq!(
            queue.pending_handles(ResourceClass::Thumb),
            vec![FileHandle(2)]
        );
    }

    #[test]
    fn test_attach_waiter_coalesces_submissions() {
        let mut queue = JobQueue::new();
        let (first, mut first_ticket) = job(5, ResourceClass::Video);
        queue.enqueue(first);

        let (waiter, mut second_ticket) = DownloadTicket::channel(FileHandle(5));
        assert!(queue.attach_waiter(FileHandle(5), waiter).is_ok());

        let (stray, _stray_ticket) = DownloadTicket::channel(FileHandle(6));
        assert!(queue.attach_waiter(FileHandle(6), stray).is_err());
        assert_eq!(queue.stats().total_coalesced, 1);

        let job = queue.take(FileHandle(5)).unwrap();
        assert_eq!(job.waiter_count(), 2);
        job.resolve(Ok(DownloadOutcome::Cancelled {
            handle: FileHandle(5),
        }));
        assert!(first_ticket.try_result().is_some());
        assert!(second_ticket.try_result().is_some());
        assert_eq!(queue.stats().total_cancelled, 0);
    }

    #[test]
    fn test_oldest_queued_at_tracks_head() {
        let mut queue = JobQueue::new();
        assert!(queue.oldest_queued_at().is_none());

        let (first, _t1) = job(1, ResourceClass::Thumb);
        let first_at = first.queued_at;
        queue.enqueue(first);
        queue.enqueue(job(2, ResourceClass::Thumb).0);
        assert_eq!(queue.oldest_queued_at(), Some(first_at));
    }
}
