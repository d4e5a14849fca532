pub mod invoice;
pub mod razorpay;
pub mod rent_due;
