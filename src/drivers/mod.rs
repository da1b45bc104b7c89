// Chip-level drivers, board-independent.
//
// Pin assignments and the analog front end live in board/; drivers
// only see calibrated counts through the ChargerHal seam.

pub mod adc;
