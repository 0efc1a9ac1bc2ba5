pub trait Postincrement {
    /// Returns the current value and bumps it by one.
    fn postincrement(&mut self) -> Self;
}

impl Postincrement for u32 {
    fn postincrement(&mut self) -> Self {
        let value = *self;
        *self += 1;
        value
    }
}
