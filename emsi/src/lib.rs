//! FSC-0056/FSC-0088 EMSI handshake engine, generic over any bidirectional
//! byte stream (TCP socket or wrapped modem serial line).

pub mod crc;
pub mod dat;
pub mod reader;
pub mod runner;
pub mod session;
pub mod stream;
pub mod token;

pub use dat::{build_emsi_dat_packet, parse_emsi_data, DatError, EmsiData, IdentRecord};
pub use reader::CharReader;
pub use runner::{run_test, TestOutcome};
pub use session::{run_session, InitStrategy, SessionConfig, SessionError, SessionIdentity, SessionOutcome, Side};
pub use stream::EmsiStream;
pub use token::{CommandKind, Token};
