//! libcurl multi backend: every transfer of a batch is an Easy2 handle on one
//! Multi, tagged with its batch index as the curl token.

mod handler;
mod request;

use std::time::Duration;

use curl::easy::Easy2;
use curl::multi::{Easy2Handle, Multi};

use super::{Completion, Exchange, Multiplexer, TransportError};

pub use handler::TransferHandler;
pub use request::{ContentType, CurlOptions, RequestSpec};

/// [`Multiplexer`] over a single curl Multi handle.
pub struct CurlMultiplexer {
    multi: Multi,
}

impl CurlMultiplexer {
    pub fn new() -> Self {
        Self { multi: Multi::new() }
    }
}

impl Default for CurlMultiplexer {
    fn default() -> Self {
        Self::new()
    }
}

impl Multiplexer for CurlMultiplexer {
    type Request = Easy2<TransferHandler>;
    type Handle = Easy2Handle<TransferHandler>;

    fn register(
        &mut self,
        token: usize,
        request: Self::Request,
    ) -> Result<Self::Handle, TransportError> {
        let mut handle = self.multi.add2(request)?;
        if let Err(e) = handle.set_token(token) {
            // Take the handle back out so it is not driven without a token.
            let _ = self.multi.remove2(handle);
            return Err(e.into());
        }
        Ok(handle)
    }

    fn deregister(&mut self, handle: Self::Handle) -> Result<Self::Request, TransportError> {
        Ok(self.multi.remove2(handle)?)
    }

    fn suggested_wait(&self) -> Option<Duration> {
        self.multi.get_timeout().ok().flatten()
    }

    fn wait(&mut self, timeout: Duration) -> Result<(), TransportError> {
        self.multi.wait(&mut [], timeout)?;
        Ok(())
    }

    fn step(&mut self) -> Result<usize, TransportError> {
        Ok(self.multi.perform()? as usize)
    }

    fn harvest(&mut self) -> Result<Vec<Completion>, TransportError> {
        let mut done = Vec::new();
        let mut bad_token = None;
        self.multi.messages(|msg| {
            let Some(result) = msg.result() else {
                return;
            };
            match msg.token() {
                Ok(token) => done.push(Completion {
                    token,
                    result: result.map_err(TransportError::from),
                }),
                Err(e) => bad_token = Some(e),
            }
        });
        match bad_token {
            Some(e) => Err(e.into()),
            None => Ok(done),
        }
    }
}

impl Exchange for Easy2<TransferHandler> {
    fn rewind(&mut self) {
        self.get_mut().rewind();
    }

    fn status(&mut self) -> Result<u32, TransportError> {
        Ok(self.response_code()?)
    }

    fn take_response(&mut self) -> Vec<u8> {
        self.get_mut().take_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_multi_harvests_nothing() {
        let mut mux = CurlMultiplexer::new();
        assert_eq!(mux.step().unwrap(), 0);
        assert!(mux.harvest().unwrap().is_empty());
    }

    #[test]
    fn register_then_deregister_returns_request() {
        let mut mux = CurlMultiplexer::new();
        let easy = RequestSpec::write("http://127.0.0.1:9/d", b"xyz".to_vec())
            .build(&CurlOptions::default())
            .unwrap();
        let handle = mux.register(4, easy).unwrap();
        let mut easy = mux.deregister(handle).unwrap();
        assert_eq!(easy.get_ref().payload().as_bytes(), b"xyz");
        easy.rewind();
        assert!(easy.take_response().is_empty());
    }
}
