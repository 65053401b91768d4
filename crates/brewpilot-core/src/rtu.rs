//! Modbus RTU framing for the two functions the controller uses.
//!
//! | Function | Code | Request | Response |
//! |----------|------|---------|----------|
//! | Read input registers | `0x04` | address, count | byte count, words |
//! | Write single register | `0x06` | address, value | echo of request |
//!
//! Register words travel big-endian; the trailing CRC travels little-endian.

use thiserror::Error;

pub const READ_INPUT_REGISTERS: u8 = 0x04;
pub const WRITE_SINGLE_REGISTER: u8 = 0x06;

const EXCEPTION_FLAG: u8 = 0x80;

/// Bytes of a response that determine its total length.
pub const RESPONSE_HEAD_LEN: usize = 3;

/// Largest register count a single read may request.
pub const MAX_READ_COUNT: u16 = 125;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RtuError {
    #[error("frame too short: {0} bytes")]
    ShortFrame(usize),
    #[error("CRC mismatch: expected 0x{expected:04x}, got 0x{actual:04x}")]
    Crc { expected: u16, actual: u16 },
    #[error("response from unit {actual}, expected unit {expected}")]
    UnexpectedUnit { expected: u8, actual: u8 },
    #[error("unexpected function code 0x{actual:02x}, expected 0x{expected:02x}")]
    UnexpectedFunction { expected: u8, actual: u8 },
    #[error("device answered with exception code {code} to function 0x{function:02x}")]
    Exception { function: u8, code: u8 },
    #[error("byte count {actual} does not match {expected}")]
    ByteCount { expected: usize, actual: usize },
    #[error("write echo mismatch")]
    EchoMismatch,
    #[error("register count {0} out of range")]
    InvalidCount(u16),
}

/// CRC-16/MODBUS (poly 0xA001 reflected, init 0xFFFF).
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

fn seal(mut frame: Vec<u8>) -> Vec<u8> {
    let crc = crc16(&frame);
    frame.extend(crc.to_le_bytes());
    frame
}

pub fn encode_read_input_registers(unit: u8, address: u16, count: u16) -> Result<Vec<u8>, RtuError> {
    if count == 0 || count > MAX_READ_COUNT {
        return Err(RtuError::InvalidCount(count));
    }
    let mut frame = vec![unit, READ_INPUT_REGISTERS];
    frame.extend(address.to_be_bytes());
    frame.extend(count.to_be_bytes());
    Ok(seal(frame))
}

pub fn encode_write_single_register(unit: u8, address: u16, value: u16) -> Vec<u8> {
    let mut frame = vec![unit, WRITE_SINGLE_REGISTER];
    frame.extend(address.to_be_bytes());
    frame.extend(value.to_be_bytes());
    seal(frame)
}

/// Total response length implied by its first [`RESPONSE_HEAD_LEN`] bytes.
pub fn response_len(head: &[u8]) -> Result<usize, RtuError> {
    if head.len() < RESPONSE_HEAD_LEN {
        return Err(RtuError::ShortFrame(head.len()));
    }
    let function = head[1];
    Ok(if function & EXCEPTION_FLAG != 0 {
        5
    } else if function == READ_INPUT_REGISTERS {
        RESPONSE_HEAD_LEN + usize::from(head[2]) + 2
    } else {
        8
    })
}

/// Validate framing common to every response and return the payload
/// between the function code and the CRC.
fn open(frame: &[u8], unit: u8, function: u8) -> Result<&[u8], RtuError> {
    if frame.len() < 5 {
        return Err(RtuError::ShortFrame(frame.len()));
    }
    let (body, crc_bytes) = frame.split_at(frame.len() - 2);
    let actual = u16::from_le_bytes([crc_bytes[0], crc_bytes[1]]);
    let expected = crc16(body);
    if actual != expected {
        return Err(RtuError::Crc { expected, actual });
    }
    if body[0] != unit {
        return Err(RtuError::UnexpectedUnit {
            expected: unit,
            actual: body[0],
        });
    }
    if body[1] == function | EXCEPTION_FLAG {
        return Err(RtuError::Exception {
            function,
            code: body[2],
        });
    }
    if body[1] != function {
        return Err(RtuError::UnexpectedFunction {
            expected: function,
            actual: body[1],
        });
    }
    Ok(&body[2..])
}

pub fn decode_read_input_registers(frame: &[u8], unit: u8, count: u16) -> Result<Vec<u16>, RtuError> {
    let payload = open(frame, unit, READ_INPUT_REGISTERS)?;
    let expected = usize::from(count) * 2;
    let declared = usize::from(payload[0]);
    let data = &payload[1..];
    if declared != expected || data.len() != expected {
        return Err(RtuError::ByteCount {
            expected,
            actual: data.len().min(declared),
        });
    }
    Ok(data
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect())
}

pub fn decode_write_single_register(
    frame: &[u8],
    unit: u8,
    address: u16,
    value: u16,
) -> Result<(), RtuError> {
    let payload = open(frame, unit, WRITE_SINGLE_REGISTER)?;
    let mut expected = Vec::with_capacity(4);
    expected.extend(address.to_be_bytes());
    expected.extend(value.to_be_bytes());
    if payload != expected.as_slice() {
        return Err(RtuError::EchoMismatch);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc_matches_reference_vector() {
        // Read holding registers, unit 1, address 0, count 10.
        let frame = [0x01, 0x03, 0x00, 0x00, 0x00, 0x0A];
        assert_eq!(crc16(&frame).to_le_bytes(), [0xC5, 0xCD]);
        assert_eq!(crc16(b"123456789"), 0x4B37);
    }

    #[test]
    fn read_request_layout() {
        let frame = encode_read_input_registers(2, 1000, 107).unwrap();
        assert_eq!(&frame[..6], &[0x02, 0x04, 0x03, 0xE8, 0x00, 0x6B]);
        assert_eq!(frame.len(), 8);
        assert_eq!(crc16(&frame), 0, "CRC over a sealed frame is zero");
    }

    #[test]
    fn read_request_rejects_bad_counts() {
        assert_eq!(encode_read_input_registers(2, 0, 0), Err(RtuError::InvalidCount(0)));
        assert_eq!(encode_read_input_registers(2, 0, 126), Err(RtuError::InvalidCount(126)));
    }

    fn read_response(unit: u8, words: &[u16]) -> Vec<u8> {
        let mut frame = vec![unit, READ_INPUT_REGISTERS, (words.len() * 2) as u8];
        for word in words {
            frame.extend(word.to_be_bytes());
        }
        seal(frame)
    }

    #[test]
    fn decodes_read_response() {
        let frame = read_response(2, &[0xA55A, 0x0102]);
        assert_eq!(response_len(&frame[..3]).unwrap(), frame.len());
        assert_eq!(
            decode_read_input_registers(&frame, 2, 2).unwrap(),
            vec![0xA55A, 0x0102]
        );
    }

    #[test]
    fn read_response_errors() {
        let mut frame = read_response(2, &[1]);
        assert!(matches!(
            decode_read_input_registers(&frame, 3, 1),
            Err(RtuError::UnexpectedUnit { expected: 3, actual: 2 })
        ));
        assert!(matches!(
            decode_read_input_registers(&frame, 2, 2),
            Err(RtuError::ByteCount { expected: 4, .. })
        ));

        frame[3] ^= 0xFF;
        assert!(matches!(
            decode_read_input_registers(&frame, 2, 1),
            Err(RtuError::Crc { .. })
        ));
    }

    #[test]
    fn exception_response() {
        let frame = seal(vec![2, READ_INPUT_REGISTERS | EXCEPTION_FLAG, 0x02]);
        assert_eq!(response_len(&frame[..3]).unwrap(), 5);
        assert_eq!(
            decode_read_input_registers(&frame, 2, 1),
            Err(RtuError::Exception {
                function: READ_INPUT_REGISTERS,
                code: 2
            })
        );
    }

    #[test]
    fn write_echo() {
        let request = encode_write_single_register(2, 0, 0x0408);
        assert_eq!(&request[..6], &[0x02, 0x06, 0x00, 0x00, 0x04, 0x08]);
        assert_eq!(response_len(&request[..3]).unwrap(), 8);
        assert!(decode_write_single_register(&request, 2, 0, 0x0408).is_ok());
        assert_eq!(
            decode_write_single_register(&request, 2, 0, 0x0409),
            Err(RtuError::EchoMismatch)
        );
    }

    #[test]
    fn short_frames() {
        assert_eq!(response_len(&[2, 4]), Err(RtuError::ShortFrame(2)));
        assert_eq!(
            decode_write_single_register(&[2, 6, 0], 2, 0, 0),
            Err(RtuError::ShortFrame(3))
        );
    }
}
