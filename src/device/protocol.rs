//! GQ-RFC1201 protocol client for the GMC-300E Plus
//!
//! The protocol is stateless per command: an ASCII command is written and a
//! fixed-length binary response is read back. There is no checksum, length
//! prefix or resynchronization marker, so the expected response length is
//! the only frame boundary signal and stale bytes must be purged before
//! every exchange. Commands are fire-and-wait, never pipelined; retry
//! policy lives in the monitor loop, not here.

use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime, Timelike};
use tracing::debug;

use super::transport::{SerialTransport, SerialTransportConfig, Transport};
use crate::error::{GmcSrvError, Result};

/// Acknowledge sentinel returned by the device for set-operations and as the
/// trailing byte of the datetime frame
pub const ACK: u8 = 0xAA;

/// Delay between writing a command and reading the response. The device has
/// no flow control and answers slowly.
pub const COMMAND_SETTLE_DELAY: Duration = Duration::from_millis(500);

const CMD_GET_VERSION: &str = "<GETVER>>";
const CMD_GET_CPM: &str = "<GETCPM>>";
const CMD_GET_VOLTAGE: &str = "<GETVOLT>>";
const CMD_GET_DATETIME: &str = "<GETDATETIME>>";

const VERSION_RESPONSE_LEN: usize = 14;
const CPM_RESPONSE_LEN: usize = 2;
const VOLTAGE_RESPONSE_LEN: usize = 1;
const DATETIME_RESPONSE_LEN: usize = 7;

/// Device clock reading, reconstructed from the 7-byte datetime frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceTime {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
    pub minute: u32,
    pub second: u32,
}

impl DeviceTime {
    /// Decode the `<GETDATETIME>>` response frame `{yy,mm,dd,hh,mm,ss,0xAA}`.
    pub fn from_frame(frame: &[u8]) -> Result<Self> {
        if frame.len() != DATETIME_RESPONSE_LEN {
            return Err(GmcSrvError::ResponseLength {
                expected: DATETIME_RESPONSE_LEN,
                actual: frame.len(),
            });
        }
        if frame[6] != ACK {
            return Err(GmcSrvError::DeviceNack(format!(
                "datetime frame sentinel was 0x{:02X}, expected 0x{ACK:02X}",
                frame[6]
            )));
        }

        Ok(Self {
            year: reconstruct_year(frame[0]),
            month: u32::from(frame[1]),
            day: u32::from(frame[2]),
            hour: u32::from(frame[3]),
            minute: u32::from(frame[4]),
            second: u32::from(frame[5]),
        })
    }

    /// Convert to a chrono timestamp; None when the device reports an
    /// impossible calendar date.
    pub fn to_naive(&self) -> Option<NaiveDateTime> {
        NaiveDate::from_ymd_opt(self.year, self.month, self.day)?.and_hms_opt(
            self.hour,
            self.minute,
            self.second,
        )
    }
}

/// Two-digit-year century heuristic: <50 maps to the 21st century.
///
/// Known limitation carried over from the device protocol: readings become
/// ambiguous from year 2050 onward.
fn reconstruct_year(yy: u8) -> i32 {
    if yy < 50 {
        2000 + i32::from(yy)
    } else {
        1900 + i32::from(yy)
    }
}

/// Decode the 2-byte big-endian CPM response
pub fn decode_cpm(response: &[u8]) -> Result<u16> {
    if response.len() != CPM_RESPONSE_LEN {
        return Err(GmcSrvError::ResponseLength {
            expected: CPM_RESPONSE_LEN,
            actual: response.len(),
        });
    }
    Ok(u16::from_be_bytes([response[0], response[1]]))
}

/// Decode the 1-byte battery voltage response (tenths of a volt)
pub fn decode_voltage(response: &[u8]) -> Result<f64> {
    if response.len() != VOLTAGE_RESPONSE_LEN {
        return Err(GmcSrvError::ResponseLength {
            expected: VOLTAGE_RESPONSE_LEN,
            actual: response.len(),
        });
    }
    Ok(f64::from(response[0]) / 10.0)
}

/// Encode a host timestamp as the `<SETDATETIME[..]>>` command frame.
///
/// Each field (year mod 100, month, day, hour, minute, second) is rendered
/// as two uppercase ASCII hex characters.
pub fn encode_set_datetime(dt: &NaiveDateTime) -> String {
    use chrono::Datelike;

    let yy = dt.year().rem_euclid(100) as u8;
    format!(
        "<SETDATETIME[{yy:02X}{:02X}{:02X}{:02X}{:02X}{:02X}]>>",
        dt.month(),
        dt.day(),
        dt.hour(),
        dt.minute(),
        dt.second(),
    )
}

/// Exclusive command/response session with one GMC device.
///
/// At most one command is in flight at a time; the session is created on
/// connect and destroyed on disconnect or failure.
pub struct GmcClient {
    transport: Box<dyn Transport>,
    read_timeout: Duration,
    settle_delay: Duration,
}

impl GmcClient {
    /// Open a serial session with the device
    pub async fn connect(config: SerialTransportConfig) -> Result<Self> {
        let read_timeout = config.read_timeout;
        let mut transport = SerialTransport::new(config)?;
        transport.open().await?;
        Ok(Self {
            transport: Box::new(transport),
            read_timeout,
            settle_delay: COMMAND_SETTLE_DELAY,
        })
    }

    /// Build a client over an arbitrary transport (tests use a mock here)
    pub fn with_transport(
        transport: Box<dyn Transport>,
        read_timeout: Duration,
        settle_delay: Duration,
    ) -> Self {
        Self {
            transport,
            read_timeout,
            settle_delay,
        }
    }

    /// Send a command and read its fixed-length response.
    ///
    /// Stale bytes from a prior exchange are purged first; without a frame
    /// marker in the protocol they would otherwise corrupt every response
    /// that follows. When `expected_len` is None, returns whatever arrived
    /// before the read deadline.
    pub async fn send_command(
        &mut self,
        command: &str,
        expected_len: Option<usize>,
    ) -> Result<Vec<u8>> {
        self.transport.purge().await?;
        self.transport.write_all(command.as_bytes()).await?;

        // Allow the device to process; it has no flow control
        tokio::time::sleep(self.settle_delay).await;

        let capacity = expected_len.unwrap_or(64);
        let mut buf = vec![0u8; capacity];
        let n = self.transport.read_upto(&mut buf, self.read_timeout).await?;
        buf.truncate(n);

        debug!(command, response_len = n, "Command exchange complete");
        Ok(buf)
    }

    /// Read the device firmware version string
    pub async fn get_version(&mut self) -> Result<String> {
        let response = self
            .send_command(CMD_GET_VERSION, Some(VERSION_RESPONSE_LEN))
            .await?;
        if response.len() != VERSION_RESPONSE_LEN {
            return Err(GmcSrvError::ResponseLength {
                expected: VERSION_RESPONSE_LEN,
                actual: response.len(),
            });
        }
        Ok(String::from_utf8_lossy(&response).trim().to_string())
    }

    /// Read the current counts-per-minute value
    pub async fn get_cpm(&mut self) -> Result<u16> {
        let response = self.send_command(CMD_GET_CPM, Some(CPM_RESPONSE_LEN)).await?;
        decode_cpm(&response)
    }

    /// Read the battery voltage in volts
    pub async fn get_battery_voltage(&mut self) -> Result<f64> {
        let response = self
            .send_command(CMD_GET_VOLTAGE, Some(VOLTAGE_RESPONSE_LEN))
            .await?;
        decode_voltage(&response)
    }

    /// Read the device clock
    pub async fn get_datetime(&mut self) -> Result<DeviceTime> {
        let response = self
            .send_command(CMD_GET_DATETIME, Some(DATETIME_RESPONSE_LEN))
            .await?;
        DeviceTime::from_frame(&response)
    }

    /// Set the device clock
    pub async fn set_datetime(&mut self, dt: &NaiveDateTime) -> Result<()> {
        let command = encode_set_datetime(dt);
        let response = self.send_command(&command, Some(1)).await?;

        match response.as_slice() {
            [ACK] => Ok(()),
            [other] => Err(GmcSrvError::DeviceNack(format!(
                "set datetime answered 0x{other:02X}, expected 0x{ACK:02X}"
            ))),
            _ => Err(GmcSrvError::ResponseLength {
                expected: 1,
                actual: response.len(),
            }),
        }
    }

    /// Close the session; idempotent
    pub async fn disconnect(&mut self) -> Result<()> {
        self.transport.close().await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use super::*;

    /// Mock transport with scripted responses and a record of written bytes
    struct MockTransport {
        responses: VecDeque<Vec<u8>>,
        written: Arc<Mutex<Vec<Vec<u8>>>>,
        purges: Arc<Mutex<usize>>,
    }

    impl MockTransport {
        fn new(responses: Vec<Vec<u8>>) -> Self {
            Self {
                responses: responses.into(),
                written: Arc::new(Mutex::new(Vec::new())),
                purges: Arc::new(Mutex::new(0)),
            }
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn open(&mut self) -> Result<()> {
            Ok(())
        }

        async fn close(&mut self) -> Result<()> {
            Ok(())
        }

        fn is_open(&self) -> bool {
            true
        }

        async fn purge(&mut self) -> Result<()> {
            *self.purges.lock().unwrap() += 1;
            Ok(())
        }

        async fn write_all(&mut self, data: &[u8]) -> Result<()> {
            self.written.lock().unwrap().push(data.to_vec());
            Ok(())
        }

        async fn read_upto(&mut self, buf: &mut [u8], _deadline: Duration) -> Result<usize> {
            let response = self.responses.pop_front().unwrap_or_default();
            let n = response.len().min(buf.len());
            buf[..n].copy_from_slice(&response[..n]);
            Ok(n)
        }
    }

    fn client_with(responses: Vec<Vec<u8>>) -> (GmcClient, Arc<Mutex<Vec<Vec<u8>>>>) {
        let mock = MockTransport::new(responses);
        let written = mock.written.clone();
        let client = GmcClient::with_transport(
            Box::new(mock),
            Duration::from_millis(50),
            Duration::ZERO,
        );
        (client, written)
    }

    #[test]
    fn test_decode_cpm_big_endian() {
        assert_eq!(decode_cpm(&[0x01, 0x02]).unwrap(), 258);
        assert_eq!(decode_cpm(&[0x00, 0x00]).unwrap(), 0);
        assert_eq!(decode_cpm(&[0xFF, 0xFF]).unwrap(), 65535);
    }

    #[test]
    fn test_decode_cpm_wrong_length() {
        let err = decode_cpm(&[0x01]).unwrap_err();
        assert!(matches!(
            err,
            GmcSrvError::ResponseLength {
                expected: 2,
                actual: 1
            }
        ));
    }

    #[test]
    fn test_decode_voltage() {
        assert!((decode_voltage(&[70]).unwrap() - 7.0).abs() < f64::EPSILON);
        assert!((decode_voltage(&[95]).unwrap() - 9.5).abs() < f64::EPSILON);
        assert!(decode_voltage(&[]).is_err());
    }

    #[test]
    fn test_century_reconstruction() {
        assert_eq!(reconstruct_year(49), 2049);
        assert_eq!(reconstruct_year(50), 1950);
        assert_eq!(reconstruct_year(0), 2000);
        assert_eq!(reconstruct_year(99), 1999);
    }

    #[test]
    fn test_datetime_frame_decode() {
        let frame = [24, 3, 5, 14, 30, 0, ACK];
        let dt = DeviceTime::from_frame(&frame).unwrap();
        assert_eq!(dt.year, 2024);
        assert_eq!(dt.month, 3);
        assert_eq!(dt.day, 5);
        assert_eq!(dt.hour, 14);
        assert_eq!(dt.minute, 30);
        assert_eq!(dt.second, 0);
        assert!(dt.to_naive().is_some());
    }

    #[test]
    fn test_datetime_frame_rejects_bad_sentinel() {
        let frame = [24, 3, 5, 14, 30, 0, 0x00];
        assert!(matches!(
            DeviceTime::from_frame(&frame).unwrap_err(),
            GmcSrvError::DeviceNack(_)
        ));
    }

    #[test]
    fn test_datetime_frame_rejects_short_frame() {
        assert!(matches!(
            DeviceTime::from_frame(&[24, 3, 5]).unwrap_err(),
            GmcSrvError::ResponseLength {
                expected: 7,
                actual: 3
            }
        ));
    }

    #[test]
    fn test_impossible_calendar_date() {
        let frame = [24, 13, 40, 14, 30, 0, ACK];
        let dt = DeviceTime::from_frame(&frame).unwrap();
        assert!(dt.to_naive().is_none());
    }

    #[test]
    fn test_encode_set_datetime() {
        let dt = NaiveDate::from_ymd_opt(2024, 3, 5)
            .unwrap()
            .and_hms_opt(14, 30, 0)
            .unwrap();
        assert_eq!(encode_set_datetime(&dt), "<SETDATETIME[1803050E1E00]>>");
    }

    #[tokio::test]
    async fn test_get_version_sends_command_and_trims() {
        let (mut client, written) = client_with(vec![b"GMC-300Re 4.54".to_vec()]);
        let version = client.get_version().await.unwrap();
        assert_eq!(version, "GMC-300Re 4.54");
        assert_eq!(written.lock().unwrap()[0], b"<GETVER>>");
    }

    #[tokio::test]
    async fn test_get_cpm_exchange() {
        let (mut client, written) = client_with(vec![vec![0x01, 0x02]]);
        assert_eq!(client.get_cpm().await.unwrap(), 258);
        assert_eq!(written.lock().unwrap()[0], b"<GETCPM>>");
    }

    #[tokio::test]
    async fn test_short_read_is_response_length_error() {
        // Device returns only one of the two CPM bytes
        let (mut client, _) = client_with(vec![vec![0x01]]);
        assert!(matches!(
            client.get_cpm().await.unwrap_err(),
            GmcSrvError::ResponseLength {
                expected: 2,
                actual: 1
            }
        ));
    }

    #[tokio::test]
    async fn test_set_datetime_ack_and_nack() {
        let dt = NaiveDate::from_ymd_opt(2024, 3, 5)
            .unwrap()
            .and_hms_opt(14, 30, 0)
            .unwrap();

        let (mut client, written) = client_with(vec![vec![ACK]]);
        assert!(client.set_datetime(&dt).await.is_ok());
        assert_eq!(written.lock().unwrap()[0], b"<SETDATETIME[1803050E1E00]>>");

        let (mut client, _) = client_with(vec![vec![0x55]]);
        assert!(matches!(
            client.set_datetime(&dt).await.unwrap_err(),
            GmcSrvError::DeviceNack(_)
        ));

        // No response at all
        let (mut client, _) = client_with(vec![vec![]]);
        assert!(client.set_datetime(&dt).await.is_err());
    }

    #[tokio::test]
    async fn test_buffers_purged_before_every_command() {
        let mock = MockTransport::new(vec![vec![0x00, 0x10], vec![70]]);
        let purges = mock.purges.clone();
        let mut client = GmcClient::with_transport(
            Box::new(mock),
            Duration::from_millis(50),
            Duration::ZERO,
        );

        client.get_cpm().await.unwrap();
        client.get_battery_voltage().await.unwrap();
        assert_eq!(*purges.lock().unwrap(), 2);
    }
}
