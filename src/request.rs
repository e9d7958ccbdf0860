//! Memory requests issued by the processors and their trace text form

use std::fmt;

use crate::error::TraceError;

/// Placeholder for an absent address or data field (`-`)
pub const NO_VALUE: u16 = u16::MAX;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    Read,
    Write,
    Barrier,
}

impl Operation {
    /// Arbitration class: barriers go first, then writes, then reads
    pub fn class_rank(self) -> u8 {
        match self {
            Operation::Barrier => 0,
            Operation::Write => 1,
            Operation::Read => 2,
        }
    }

    pub fn keyword(self) -> &'static str {
        match self {
            Operation::Read => "read",
            Operation::Write => "write",
            Operation::Barrier => "barrier",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operation::Read => "READ",
            Operation::Write => "WRITE",
            Operation::Barrier => "BARRIER",
        })
    }
}

/// A single request from one processor
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Request {
    pub processor_id: usize,
    pub op: Operation,
    pub address: u16,
    pub write_data: u16,
}

impl Request {
    pub fn new(
        processor_id: usize,
        op: Operation,
        address: u16,
        write_data: u16,
    ) -> Self {
        Self { processor_id, op, address, write_data }
    }

    pub fn read(processor_id: usize, address: u16) -> Self {
        Self::new(processor_id, Operation::Read, address, 0)
    }

    pub fn write(processor_id: usize, address: u16, write_data: u16) -> Self {
        Self::new(processor_id, Operation::Write, address, write_data)
    }

    pub fn barrier(processor_id: usize) -> Self {
        Self::new(processor_id, Operation::Barrier, 0, 0)
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<P{}, {}, ", self.processor_id, self.op.keyword())?;
        match self.op {
            Operation::Barrier => write!(f, "-, ")?,
            _ => write!(f, "{}, ", self.address)?,
        }
        match self.op {
            Operation::Write => write!(f, "{}>", self.write_data),
            _ => write!(f, "->"),
        }
    }
}

fn parse_field(token: &str, line: usize) -> Result<u16, TraceError> {
    if token == "-" {
        return Ok(NO_VALUE);
    }
    // Wider values are truncated to 16 bits
    token
        .parse::<u64>()
        .map(|value| value as u16)
        .map_err(|_| TraceError::InvalidNumber { line, text: token.to_string() })
}

/// Parse a request of the form `<P0, write, 32, 7>`
pub fn parse_request(
    text: &str,
    line: usize,
    num_cores: usize,
) -> Result<Request, TraceError> {
    let tokens: Vec<&str> = text
        .split(',')
        .map(|token| token.trim_matches(&[' ', '<', '>', '\t'][..]))
        .collect();

    if tokens.len() != 4 {
        return Err(TraceError::InvalidFormat { line, text: text.to_string() });
    }

    let invalid_id = || TraceError::InvalidProcessor {
        line,
        id: tokens[0].to_string(),
    };
    let processor_id = tokens[0]
        .strip_prefix('P')
        .ok_or_else(invalid_id)?
        .parse::<usize>()
        .map_err(|_| invalid_id())?;
    if processor_id >= num_cores {
        return Err(invalid_id());
    }

    let op = match tokens[1] {
        "read" => Operation::Read,
        "write" => Operation::Write,
        "barrier" => Operation::Barrier,
        other => {
            return Err(TraceError::InvalidOperation { line, op: other.to_string() })
        }
    };

    let address = parse_field(tokens[2], line)?;
    let write_data = parse_field(tokens[3], line)?;

    Ok(Request::new(processor_id, op, address, write_data))
}

/// Parse one trace line into the batch of requests for that cycle.
/// `NULL` slots are skipped.
pub fn parse_trace_line(
    text: &str,
    line: usize,
    num_cores: usize,
) -> Result<Vec<Request>, TraceError> {
    let fields: Vec<&str> = text
        .split(';')
        .map(|field| field.trim_matches(|c: char| c == ' ' || c == '\t'))
        .collect();

    // A trailing separator leaves an empty last field behind
    let found = fields.iter().filter(|field| !field.is_empty()).count();
    if found > num_cores {
        return Err(TraceError::FieldCount { line, max: num_cores, found });
    }

    fields
        .into_iter()
        .filter(|field| !field.is_empty() && *field != "NULL")
        .map(|field| parse_request(field, line, num_cores))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(Request::write(0, 32, 7).to_string(), "<P0, write, 32, 7>");
        assert_eq!(Request::read(1, 32).to_string(), "<P1, read, 32, ->");
        assert_eq!(Request::barrier(2).to_string(), "<P2, barrier, -, ->");
    }

    #[test]
    fn test_parse_request() {
        let request = parse_request("<P3, write, 1024, 15>", 1, 4).unwrap();
        assert_eq!(request, Request::write(3, 1024, 15));

        let request = parse_request(" <P1, read, 32, -> ", 1, 4).unwrap();
        assert_eq!(request.op, Operation::Read);
        assert_eq!(request.address, 32);
        assert_eq!(request.write_data, NO_VALUE);

        let request = parse_request("<P2, barrier, -, ->", 1, 4).unwrap();
        assert_eq!(request.op, Operation::Barrier);
        assert_eq!(request.address, NO_VALUE);
    }

    #[test]
    fn test_parse_request_truncates() {
        let request = parse_request("<P0, write, 65568, 65543>", 1, 4).unwrap();
        assert_eq!(request.address, 32);
        assert_eq!(request.write_data, 7);
    }

    #[test]
    fn test_parse_request_errors() {
        assert_eq!(
            parse_request("<P4, read, 0, ->", 7, 4),
            Err(TraceError::InvalidProcessor { line: 7, id: "P4".into() })
        );
        assert_eq!(
            parse_request("<P0, fetch, 0, ->", 2, 4),
            Err(TraceError::InvalidOperation { line: 2, op: "fetch".into() })
        );
        assert_eq!(
            parse_request("<P0, read, 0>", 3, 4),
            Err(TraceError::InvalidFormat { line: 3, text: "<P0, read, 0>".into() })
        );
        assert_eq!(
            parse_request("<P0, read, zero, ->", 4, 4),
            Err(TraceError::InvalidNumber { line: 4, text: "zero".into() })
        );
    }

    #[test]
    fn test_parse_trace_line() {
        let line = "<P0, write, 32, 7>;\tNULL;\t<P2, read, 64, ->;\tNULL\t";
        let batch = parse_trace_line(line, 1, 4).unwrap();
        assert_eq!(batch, vec![Request::write(0, 32, 7), Request::read(2, 64)]);

        assert!(parse_trace_line("NULL;NULL;NULL;NULL", 1, 4).unwrap().is_empty());
        assert!(parse_trace_line("", 1, 4).unwrap().is_empty());
    }

    #[test]
    fn test_parse_trace_line_too_many_fields() {
        assert_eq!(
            parse_trace_line("NULL;NULL;NULL;NULL;NULL", 9, 4),
            Err(TraceError::FieldCount { line: 9, max: 4, found: 5 })
        );
    }

    #[test]
    fn test_class_rank() {
        assert!(Operation::Barrier.class_rank() < Operation::Write.class_rank());
        assert!(Operation::Write.class_rank() < Operation::Read.class_rank());
    }
}
