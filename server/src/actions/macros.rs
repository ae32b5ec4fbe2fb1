/*
 * Created on Wed Mar 08 2023
 *
 * This file is a part of Rubra
 * Rubra is a free and open-source Redis-compatible in-memory data store
 * written by the Rubra developers with the vision to provide a fast,
 * predictable and easy to operate key/value service.
 *
 * Copyright (c) 2023, the Rubra developers
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 *
*/

#[macro_export]
/// Declare action functions. Every action gets the same shape: the store
/// handle, the client's connection, the per-session state and the
/// argument slice (command name already stripped). Name an argument with
/// a leading underscore if the action doesn't touch it.
macro_rules! action {
    ($($(#[$attr:meta])* fn $fname:ident($handle:ident, $con:ident, $client:ident, $act:ident) $block:block)*) => {
        $(
            $(#[$attr])*
            pub async fn $fname<T>(
                $handle: &$crate::corestore::Corestore,
                $con: &mut $crate::dbnet::connection::Connection<T>,
                $client: &mut $crate::dbnet::ClientState,
                $act: &[$crate::corestore::Data],
            ) -> $crate::actions::ActionResult<()>
            where
                T: ::tokio::io::AsyncRead + ::tokio::io::AsyncWrite + Unpin + Send,
            {
                $block
            }
        )*
    };
}
