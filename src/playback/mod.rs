pub mod clock;
pub mod controller;
pub mod dispatcher;
pub mod resolver;
pub mod scheduler;
pub mod state;
pub mod synchronizer;


pub use clock::*;
pub use controller::*;
pub use dispatcher::*;
pub use resolver::*;
pub use scheduler::*;
pub use state::*;
pub use synchronizer::*;
