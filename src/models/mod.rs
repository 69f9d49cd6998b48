pub mod cart_lock;
pub mod event;
pub mod fiscal;
pub mod order;
pub mod payment;
pub mod reservation;
pub mod seat;
pub mod zone;

pub use cart_lock::{CartItemLock, LockStatus};
pub use event::Event;
pub use fiscal::{FiscalAction, FiscalAuditEntry, FiscalSeriesCounter};
pub use order::{Order, OrderItem, OrderStatus};
pub use payment::{Payment, PaymentStatus};
pub use reservation::{ReservationStatus, ReservedTicket};
pub use seat::SeatStatus;
pub use zone::Zone;
