use std::{
    sync::{Mutex, MutexGuard},
    time::Duration,
};

use reqwest::blocking::{Client, Response};

use crate::error::DeviceError;

pub const DEFAULT_PORT: u16 = 11000;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
pub const MAX_VOLUME: u8 = 100;

/// Blocking client for the BluOS HTTP control API.
///
/// Every command is a parameterised GET. The last volume this client set (or
/// read) is cached so relative volume changes avoid a status round trip.
#[derive(Debug)]
pub struct BluOsClient {
    base_url: String,
    http: Client,
    volume: Mutex<Option<u8>>,
}

impl BluOsClient {
    pub fn new(host: &str, port: u16, timeout: Duration) -> Result<Self, DeviceError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: format!("http://{host}:{port}"),
            http,
            volume: Mutex::new(None),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn cached_volume(&self) -> Option<u8> {
        *self.cache()
    }

    pub fn set_volume(&self, level: u8) -> Result<(), DeviceError> {
        if level > MAX_VOLUME {
            return Err(DeviceError::InvalidVolume(level));
        }
        self.get("/Volume", &[("level", level.to_string())])?;
        *self.cache() = Some(level);
        log::info!("volume set to {level}");
        Ok(())
    }

    pub fn increase_volume(&self, step: u8) -> Result<(), DeviceError> {
        let current = self.current_volume()?;
        self.set_volume(current.saturating_add(step).min(MAX_VOLUME))
    }

    pub fn decrease_volume(&self, step: u8) -> Result<(), DeviceError> {
        let current = self.current_volume()?;
        self.set_volume(current.saturating_sub(step))
    }

    /// Reads the player's volume from `/Status`. A status document without a
    /// `<volume>` element reports 0.
    pub fn get_volume_level(&self) -> Result<u8, DeviceError> {
        let body = self
            .get("/Status", &[])?
            .text()
            .map_err(DeviceError::Transport)?;
        parse_volume(&body)
    }

    pub fn play(&self) -> Result<(), DeviceError> {
        self.command("/Play")
    }

    pub fn pause(&self) -> Result<(), DeviceError> {
        self.command("/Pause")
    }

    pub fn next_track(&self) -> Result<(), DeviceError> {
        self.command("/Skip")
    }

    pub fn previous_track(&self) -> Result<(), DeviceError> {
        self.command("/Back")
    }

    fn current_volume(&self) -> Result<u8, DeviceError> {
        if let Some(level) = self.cached_volume() {
            return Ok(level);
        }
        let level = self.get_volume_level()?;
        *self.cache() = Some(level);
        Ok(level)
    }

    fn command(&self, endpoint: &str) -> Result<(), DeviceError> {
        self.get(endpoint, &[])?;
        log::info!("sent {endpoint} to {}", self.base_url);
        Ok(())
    }

    fn get(&self, endpoint: &str, query: &[(&str, String)]) -> Result<Response, DeviceError> {
        let url = format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'));
        let response = self
            .http
            .get(&url)
            .query(query)
            .send()?
            .error_for_status()?;
        Ok(response)
    }

    fn cache(&self) -> MutexGuard<'_, Option<u8>> {
        self.volume
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn parse_volume(body: &str) -> Result<u8, DeviceError> {
    let doc = roxmltree::Document::parse(body)
        .map_err(|err| DeviceError::MalformedStatus(err.to_string()))?;
    let Some(node) = doc.descendants().find(|n| n.has_tag_name("volume")) else {
        return Ok(0);
    };
    let text = node.text().unwrap_or_default().trim();
    let level: i64 = text
        .parse()
        .map_err(|_| DeviceError::MalformedStatus(format!("volume `{text}` is not a number")))?;
    Ok(level.clamp(0, MAX_VOLUME as i64) as u8)
}

#[cfg(test)]
mod tests {
    use std::{
        io::{BufRead, BufReader, Write},
        net::TcpListener,
        sync::mpsc,
        thread,
    };

    use super::*;

    /// Serves `responses` in order on a loopback port and reports each
    /// request line it saw.
    fn stub_device(responses: Vec<(u16, &'static str)>) -> (u16, mpsc::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            for (status, body) in responses {
                let (mut stream, _) = listener.accept().unwrap();
                let mut reader = BufReader::new(stream.try_clone().unwrap());
                let mut request_line = String::new();
                reader.read_line(&mut request_line).unwrap();
                loop {
                    let mut header = String::new();
                    reader.read_line(&mut header).unwrap();
                    if header == "\r\n" || header.is_empty() {
                        break;
                    }
                }
                tx.send(request_line.trim().to_string()).unwrap();
                write!(
                    stream,
                    "HTTP/1.1 {status} X\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                )
                .unwrap();
            }
        });
        (port, rx)
    }

    fn unreachable_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    fn client(port: u16) -> BluOsClient {
        BluOsClient::new("127.0.0.1", port, Duration::from_secs(2)).unwrap()
    }

    #[test]
    fn out_of_range_volume_is_rejected_before_any_request() {
        let client = client(unreachable_port());
        let err = client.set_volume(150).unwrap_err();
        assert!(matches!(err, DeviceError::InvalidVolume(150)));
        assert_eq!(client.cached_volume(), None);
    }

    #[test]
    fn unreachable_device_is_a_transport_error_and_keeps_cache() {
        let client = client(unreachable_port());
        let err = client.set_volume(50).unwrap_err();
        assert!(matches!(err, DeviceError::Transport(_)));
        assert_eq!(client.cached_volume(), None);
    }

    #[test]
    fn failed_set_volume_keeps_the_last_known_level() {
        let (port, requests) = stub_device(vec![(200, "")]);
        let client = client(port);
        client.set_volume(30).unwrap();
        requests.recv().unwrap();
        assert_eq!(client.cached_volume(), Some(30));

        // The stub serves one response and then stops listening.
        let err = client.set_volume(60).unwrap_err();
        assert!(matches!(err, DeviceError::Transport(_)));
        assert_eq!(client.cached_volume(), Some(30));
    }

    #[test]
    fn set_volume_sends_level_and_caches_it() {
        let (port, requests) = stub_device(vec![(200, "")]);
        let client = client(port);

        client.set_volume(50).unwrap();
        assert_eq!(requests.recv().unwrap(), "GET /Volume?level=50 HTTP/1.1");
        assert_eq!(client.cached_volume(), Some(50));
    }

    #[test]
    fn error_status_is_a_transport_error() {
        let (port, _requests) = stub_device(vec![(500, "")]);
        let client = client(port);

        assert!(matches!(client.pause(), Err(DeviceError::Transport(_))));
    }

    #[test]
    fn transport_commands_hit_their_endpoints() {
        let ok = vec![(200, ""); 4];
        let (port, requests) = stub_device(ok);
        let client = client(port);

        client.play().unwrap();
        client.pause().unwrap();
        client.next_track().unwrap();
        client.previous_track().unwrap();

        let seen: Vec<String> = requests.iter().take(4).collect();
        assert_eq!(
            seen,
            vec![
                "GET /Play HTTP/1.1",
                "GET /Pause HTTP/1.1",
                "GET /Skip HTTP/1.1",
                "GET /Back HTTP/1.1",
            ]
        );
    }

    #[test]
    fn increase_volume_reads_status_once_then_uses_cache() {
        let status = "<status etag=\"1\"><state>play</state><volume>98</volume></status>";
        let (port, requests) = stub_device(vec![(200, status), (200, ""), (200, "")]);
        let client = client(port);

        client.increase_volume(5).unwrap();
        client.decrease_volume(10).unwrap();

        let seen: Vec<String> = requests.iter().take(3).collect();
        assert_eq!(
            seen,
            vec![
                "GET /Status HTTP/1.1",
                "GET /Volume?level=100 HTTP/1.1",
                "GET /Volume?level=90 HTTP/1.1",
            ]
        );
        assert_eq!(client.cached_volume(), Some(90));
    }

    #[test]
    fn parses_nested_volume_element() {
        let body = "<status><player><volume db=\"-20\">37</volume></player></status>";
        assert_eq!(parse_volume(body).unwrap(), 37);
    }

    #[test]
    fn missing_volume_element_reads_as_zero() {
        assert_eq!(parse_volume("<status><state>pause</state></status>").unwrap(), 0);
    }

    #[test]
    fn garbage_status_is_malformed() {
        assert!(matches!(parse_volume("not xml"), Err(DeviceError::MalformedStatus(_))));
        assert!(matches!(
            parse_volume("<status><volume>loud</volume></status>"),
            Err(DeviceError::MalformedStatus(_))
        ));
    }
}
