//! Host shells. Only the SDL2 desktop host lives here; it is compiled with
//! the `sdl` feature.

pub mod sdl;
