use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::detection::domain::face_detector::{DetectorError, DetectorOptions, FaceDetector};
use crate::shared::face_box::FaceBox;
use crate::shared::frame::Frame;

struct Request {
    id: u64,
    frame: Frame,
    options: DetectorOptions,
}

struct Response {
    id: u64,
    result: Result<Vec<FaceBox>, DetectorError>,
}

/// Decorator that bounds how long a detection call may take.
///
/// The wrapped detector runs on its own worker thread. A call that misses its
/// deadline returns [`DetectorError::Timeout`] and leaves the request running;
/// the next call drains that request before submitting a new one, so the
/// wrapped detector never sees more than one request at a time.
pub struct TimedFaceDetector {
    requests: Option<Sender<Request>>,
    responses: Receiver<Response>,
    timeout: Duration,
    next_id: u64,
    in_flight: Option<u64>,
    worker: Option<JoinHandle<()>>,
}

impl TimedFaceDetector {
    pub fn new(mut inner: Box<dyn FaceDetector>, timeout: Duration) -> Self {
        let (request_tx, request_rx) = crossbeam_channel::bounded::<Request>(1);
        let (response_tx, response_rx) = crossbeam_channel::bounded::<Response>(1);

        let worker = thread::spawn(move || {
            for request in request_rx {
                let result = inner.detect(&request.frame, &request.options);
                let response = Response {
                    id: request.id,
                    result,
                };
                if response_tx.send(response).is_err() {
                    break;
                }
            }
        });

        Self {
            requests: Some(request_tx),
            responses: response_rx,
            timeout,
            next_id: 0,
            in_flight: None,
            worker: Some(worker),
        }
    }

    fn await_response(
        &self,
        id: u64,
        deadline: Instant,
    ) -> Option<Result<Vec<FaceBox>, DetectorError>> {
        loop {
            match self.responses.recv_deadline(deadline) {
                Ok(response) if response.id == id => return Some(response.result),
                Ok(stale) => log::debug!("Discarding stale detection result #{}", stale.id),
                Err(RecvTimeoutError::Timeout) => return None,
                Err(RecvTimeoutError::Disconnected) => return Some(Err(DetectorError::Stopped)),
            }
        }
    }
}

impl FaceDetector for TimedFaceDetector {
    fn detect(
        &mut self,
        frame: &Frame,
        options: &DetectorOptions,
    ) -> Result<Vec<FaceBox>, DetectorError> {
        let deadline = Instant::now() + self.timeout;

        if let Some(pending) = self.in_flight {
            match self.await_response(pending, deadline) {
                Some(Err(DetectorError::Stopped)) => return Err(DetectorError::Stopped),
                Some(_) => self.in_flight = None,
                None => return Err(DetectorError::Timeout(self.timeout)),
            }
        }

        let requests = self.requests.as_ref().ok_or(DetectorError::Stopped)?;
        let id = self.next_id;
        self.next_id += 1;
        requests
            .send(Request {
                id,
                frame: frame.clone(),
                options: *options,
            })
            .map_err(|_| DetectorError::Stopped)?;
        self.in_flight = Some(id);

        match self.await_response(id, deadline) {
            Some(result) => {
                self.in_flight = None;
                result
            }
            None => Err(DetectorError::Timeout(self.timeout)),
        }
    }
}

impl Drop for TimedFaceDetector {
    fn drop(&mut self) {
        self.requests.take();
        if let Some(worker) = self.worker.take() {
            if self.in_flight.is_some() {
                // The worker exits on its own once the outstanding call returns.
                log::debug!("Detaching detector worker with a call still in flight");
            } else if worker.join().is_err() {
                log::warn!("Detector worker panicked");
            }
        }
    }
}
