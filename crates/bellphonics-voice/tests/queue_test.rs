use async_trait::async_trait;
use bellphonics_types::SpeechEvent;
use bellphonics_voice::{DeliveryQueue, MockSpeech, SpeechCapability, VoiceError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};

/// Reports every utterance it is asked to speak, failing or panicking on
/// request.
#[derive(Debug)]
struct Recorder {
    spoken: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl SpeechCapability for Recorder {
    async fn speak(
        &self,
        text: &str,
        _voice: Option<&str>,
        _volume: Option<f32>,
    ) -> Result<(), VoiceError> {
        let _ = self.spoken.send(text.to_string());
        match text {
            "fail" => Err(VoiceError::Tts("synthesis failed".to_string())),
            "panic" => panic!("backend exploded"),
            _ => Ok(()),
        }
    }
}

/// Holds each utterance until the test releases a permit.
#[derive(Debug)]
struct Gated {
    started: mpsc::UnboundedSender<String>,
    finished: mpsc::UnboundedSender<String>,
    release: Arc<Semaphore>,
}

#[async_trait]
impl SpeechCapability for Gated {
    async fn speak(
        &self,
        text: &str,
        _voice: Option<&str>,
        _volume: Option<f32>,
    ) -> Result<(), VoiceError> {
        let _ = self.started.send(text.to_string());
        let permit = self.release.acquire().await.expect("semaphore closed");
        permit.forget();
        let _ = self.finished.send(text.to_string());
        Ok(())
    }
}

fn event(id: &str, text: &str) -> SpeechEvent {
    SpeechEvent::new(id, text)
}

async fn next(rx: &mut mpsc::UnboundedReceiver<String>) -> String {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for speech")
        .expect("capability dropped")
}

fn recorder() -> (Arc<Recorder>, mpsc::UnboundedReceiver<String>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(Recorder { spoken: tx }), rx)
}

#[tokio::test]
async fn test_jobs_are_spoken_in_fifo_order() {
    let (capability, mut spoken) = recorder();
    let queue = DeliveryQueue::new(capability);

    queue.enqueue(event("event-aaaa", "A"));
    queue.enqueue(event("event-bbbb", "B"));
    queue.enqueue(event("event-cccc", "C"));
    assert_eq!(queue.pending(), 3);

    queue.start();
    assert_eq!(next(&mut spoken).await, "A");
    assert_eq!(next(&mut spoken).await, "B");
    assert_eq!(next(&mut spoken).await, "C");

    queue.stop().await;
    assert_eq!(queue.pending(), 0);
}

#[tokio::test]
async fn test_backend_failure_does_not_stop_worker() {
    let (capability, mut spoken) = recorder();
    let queue = DeliveryQueue::new(capability);
    queue.start();

    queue.enqueue(event("event-aaaa", "A"));
    queue.enqueue(event("event-bbbb", "fail"));
    queue.enqueue(event("event-cccc", "C"));

    assert_eq!(next(&mut spoken).await, "A");
    assert_eq!(next(&mut spoken).await, "fail");
    assert_eq!(next(&mut spoken).await, "C");
    assert!(queue.is_running());
    queue.stop().await;
}

#[tokio::test]
async fn test_backend_panic_does_not_stop_worker() {
    let (capability, mut spoken) = recorder();
    let queue = DeliveryQueue::new(capability);
    queue.start();

    queue.enqueue(event("event-aaaa", "panic"));
    queue.enqueue(event("event-bbbb", "B"));

    assert_eq!(next(&mut spoken).await, "panic");
    assert_eq!(next(&mut spoken).await, "B");
    assert!(queue.is_running());
    queue.stop().await;
}

#[tokio::test]
async fn test_start_is_idempotent() {
    let (capability, mut spoken) = recorder();
    let queue = DeliveryQueue::new(capability);
    queue.start();
    queue.start();
    queue.start();

    for i in 0..10 {
        queue.enqueue(event(&format!("event-{:04}", i), &i.to_string()));
    }
    for i in 0..10 {
        assert_eq!(next(&mut spoken).await, i.to_string());
    }
    queue.stop().await;
    assert!(!queue.is_running());
}

#[tokio::test]
async fn test_stop_finishes_in_flight_job_and_cancels_backlog() {
    let (started_tx, mut started) = mpsc::unbounded_channel();
    let (finished_tx, mut finished) = mpsc::unbounded_channel();
    let release = Arc::new(Semaphore::new(0));
    let queue = Arc::new(DeliveryQueue::new(Arc::new(Gated {
        started: started_tx,
        finished: finished_tx,
        release: release.clone(),
    })));

    queue.enqueue(event("event-0001", "first"));
    queue.enqueue(event("event-0002", "second"));
    queue.enqueue(event("event-0003", "third"));
    queue.start();
    assert_eq!(next(&mut started).await, "first");

    let stopper = queue.clone();
    let mut stop = tokio::spawn(async move { stopper.stop().await });

    // The in-flight utterance holds up the stop.
    assert!(tokio::time::timeout(Duration::from_millis(100), &mut stop)
        .await
        .is_err());

    release.add_permits(1);
    let cancelled = tokio::time::timeout(Duration::from_secs(5), stop)
        .await
        .expect("stop did not complete")
        .expect("stop task panicked");

    assert_eq!(cancelled, 2);
    assert_eq!(next(&mut finished).await, "first");
    assert!(started.try_recv().is_err(), "no further job may start");
    assert_eq!(queue.pending(), 0);
    assert!(!queue.is_running());
}

#[tokio::test]
async fn test_restart_after_stop_delivers_new_jobs() {
    let (capability, mut spoken) = recorder();
    let queue = DeliveryQueue::new(capability);

    queue.start();
    queue.enqueue(event("event-aaaa", "A"));
    assert_eq!(next(&mut spoken).await, "A");
    queue.stop().await;

    queue.enqueue(event("event-bbbb", "B"));
    assert_eq!(queue.pending(), 1);
    queue.start();
    assert_eq!(next(&mut spoken).await, "B");
    queue.stop().await;
}

#[tokio::test]
async fn test_stop_without_start_cancels_backlog() {
    let queue = DeliveryQueue::new(Arc::new(MockSpeech));
    queue.enqueue(event("event-aaaa", "A"));
    queue.enqueue(event("event-bbbb", "B"));
    assert_eq!(queue.stop().await, 2);
    assert_eq!(queue.pending(), 0);
}

#[tokio::test]
async fn test_start_is_refused_while_stop_is_draining() {
    let (started_tx, mut started) = mpsc::unbounded_channel();
    let (finished_tx, _finished) = mpsc::unbounded_channel();
    let release = Arc::new(Semaphore::new(0));
    let queue = Arc::new(DeliveryQueue::new(Arc::new(Gated {
        started: started_tx,
        finished: finished_tx,
        release: release.clone(),
    })));

    queue.enqueue(event("event-0001", "slow"));
    queue.enqueue(event("event-0002", "waiting"));
    queue.start();
    assert_eq!(next(&mut started).await, "slow");

    let stopper = queue.clone();
    let stop = tokio::spawn(async move { stopper.stop().await });
    while !queue.is_stopping() {
        tokio::task::yield_now().await;
    }

    assert!(!queue.start(), "start must not race the drain");
    assert!(!queue.is_running());

    release.add_permits(1);
    let cancelled = tokio::time::timeout(Duration::from_secs(5), stop)
        .await
        .expect("stop did not complete")
        .expect("stop task panicked");
    assert_eq!(cancelled, 1);
    assert!(!queue.is_stopping());

    // Once the stop has finished the queue can be started again.
    release.add_permits(1);
    queue.enqueue(event("event-0003", "after"));
    assert!(queue.start());
    assert_eq!(next(&mut started).await, "after");
    queue.stop().await;
}
