pub mod car;
pub mod chrono_extra;
pub mod decode;
pub mod dispatch;
pub mod event;
pub mod ndef;
pub mod notification;
pub mod portal_session;
pub mod protocol;
pub mod race;
pub mod session;
