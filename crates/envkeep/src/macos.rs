//! Keychain backend: one generic-password item per credential, addressed
//! by a prefixed service name and the variable name as account, and tagged
//! with a fixed description so enumeration can recognize this tool's items.
//!
//! Access control is per item: saving with an explicit policy rewrites the
//! first decrypt entry of the item's ACL, either demanding the keychain
//! passphrase on every read or trusting exactly this executable.

use std::ffi::CString;
use std::os::raw::c_void;
use std::os::unix::ffi::OsStrExt;
use std::ptr;

use core_foundation::array::CFArray;
use core_foundation::base::{CFType, TCFType};
use core_foundation::boolean::CFBoolean;
use core_foundation::data::CFData;
use core_foundation::dictionary::CFDictionary;
use core_foundation::string::CFString;
use core_foundation_sys::array::CFArrayRef;
use core_foundation_sys::base::{CFRelease, CFTypeRef};
use core_foundation_sys::string::CFStringRef;
use security_framework::os::macos::keychain::SecKeychain;
use tracing::warn;
use zeroize::Zeroizing;

use crate::error::{Result, StoreError};
use crate::namespaces;
use crate::secure::SecretBuffer;
use crate::store::{AccessPolicy, CredentialEntry, SecretStore};

/// Prefix turning a namespace into a keychain service identifier.
const SERVICE_PREFIX: &str = "envkeep-";
/// Description attribute marking items that belong to this tool.
const ITEM_DESCRIPTION: &str = "envkeep";

/// Require-passphrase bit of the keychain prompt selector.
const PROMPT_REQUIRE_PASSPHRASE: u16 = 0x0001;
/// Selector base applied when the current selector is fully cleared.
const PROMPT_SELECTOR_SEED: u16 = 0x0100;

/// Store backed by the user's default keychain.
pub struct KeychainStore {
    keychain: SecKeychain,
}

impl KeychainStore {
    pub fn open() -> Result<Self> {
        let keychain =
            SecKeychain::default().map_err(|err| StoreError::Backend(err.to_string()))?;
        Ok(Self { keychain })
    }

    fn keychain_ref(&self) -> ffi::SecKeychainRef {
        self.keychain.as_concrete_TypeRef().cast()
    }

    /// Look up the item for `(namespace, key)` without copying its secret.
    fn find_item(&self, namespace: &str, key: &str) -> Result<Option<KeychainItem>> {
        let service = service_name(namespace);
        let mut item: ffi::SecKeychainItemRef = ptr::null_mut();
        let status = unsafe {
            ffi::SecKeychainFindGenericPassword(
                self.keychain_ref() as CFTypeRef,
                service.len() as u32,
                service.as_ptr().cast(),
                key.len() as u32,
                key.as_ptr().cast(),
                ptr::null_mut(),
                ptr::null_mut(),
                &mut item,
            )
        };
        match status {
            ffi::errSecSuccess => Ok(Some(KeychainItem(item))),
            ffi::errSecItemNotFound => Ok(None),
            status => Err(StoreError::Backend(status_message(status))),
        }
    }

    /// Rewrite the first decrypt ACL entry of `item` for the new policy.
    fn apply_policy(&self, item: &KeychainItem, policy: AccessPolicy) -> Result<()> {
        let mut access: ffi::SecAccessRef = ptr::null_mut();
        acl_check(unsafe { ffi::SecKeychainItemCopyAccess(item.0, &mut access) })?;
        let access = CfGuard(access as CFTypeRef);

        let acl_list = unsafe {
            ffi::SecAccessCopyMatchingACLList(
                access.0 as ffi::SecAccessRef,
                ffi::kSecACLAuthorizationDecrypt as CFTypeRef,
            )
        };
        if acl_list.is_null() {
            return Err(StoreError::AccessControl(
                "item has no access control list".to_string(),
            ));
        }
        let acl_list: CFArray<CFType> = unsafe { CFArray::wrap_under_create_rule(acl_list) };
        let acl = match acl_list.get(0) {
            Some(entry) => entry.as_CFTypeRef() as ffi::SecACLRef,
            None => {
                return Err(StoreError::AccessControl(
                    "no decrypt entry in the access control list".to_string(),
                ))
            }
        };

        let mut current_apps: CFArrayRef = ptr::null();
        let mut description: CFStringRef = ptr::null();
        let mut prompt: ffi::SecKeychainPromptSelector = 0;
        acl_check(unsafe {
            ffi::SecACLCopyContents(acl, &mut current_apps, &mut description, &mut prompt)
        })?;
        if !current_apps.is_null() {
            unsafe { CFRelease(current_apps as CFTypeRef) };
        }
        let description = if description.is_null() {
            None
        } else {
            Some(unsafe { CFString::wrap_under_create_rule(description) })
        };

        let require = policy == AccessPolicy::RequirePassphrase;
        let selector = rewritten_prompt_selector(prompt, require);
        let applications = if require {
            // An empty trusted-application list: every read prompts, this
            // tool included.
            CFArray::<CFType>::from_CFTypes(&[])
        } else {
            let app = self_trusted_application()?;
            CFArray::from_CFTypes(&[app])
        };

        let description_ref = description
            .as_ref()
            .map(|text| text.as_concrete_TypeRef())
            .unwrap_or_else(ptr::null);
        acl_check(unsafe {
            ffi::SecACLSetContents(
                acl,
                applications.as_concrete_TypeRef(),
                description_ref,
                selector,
            )
        })?;
        acl_check(unsafe {
            ffi::SecKeychainItemSetAccess(item.0, access.0 as ffi::SecAccessRef)
        })?;
        Ok(())
    }
}

impl SecretStore for KeychainStore {
    fn search_namespaces(&mut self) -> Result<Vec<String>> {
        let query = CFDictionary::from_CFType_pairs(&[
            (
                attr_key(unsafe { ffi::kSecClass }),
                attr_key(unsafe { ffi::kSecClassGenericPassword }).as_CFType(),
            ),
            (
                attr_key(unsafe { ffi::kSecAttrDescription }),
                CFString::new(ITEM_DESCRIPTION).as_CFType(),
            ),
            (
                attr_key(unsafe { ffi::kSecMatchLimit }),
                attr_key(unsafe { ffi::kSecMatchLimitAll }).as_CFType(),
            ),
            (
                attr_key(unsafe { ffi::kSecReturnAttributes }),
                CFBoolean::true_value().as_CFType(),
            ),
        ]);

        let items = match copy_matching(&query)? {
            Some(items) => items,
            None => return Ok(Vec::new()),
        };

        let mut names = Vec::new();
        for item in items.iter() {
            let service = match dict_string(&item, unsafe { ffi::kSecAttrService }) {
                Some(service) => service,
                None => continue,
            };
            match service.strip_prefix(SERVICE_PREFIX) {
                Some(name) => names.push(name.to_string()),
                // Tagged with our description but not our service scheme;
                // leave it alone rather than guess.
                None => warn!("skipping keychain item with an unexpected service identifier"),
            }
        }
        Ok(namespaces::dedup_sorted(names))
    }

    fn search_values(&mut self, namespace: &str) -> Result<Vec<CredentialEntry>> {
        let service = service_name(namespace);
        let query = CFDictionary::from_CFType_pairs(&[
            (
                attr_key(unsafe { ffi::kSecClass }),
                attr_key(unsafe { ffi::kSecClassGenericPassword }).as_CFType(),
            ),
            (
                attr_key(unsafe { ffi::kSecAttrService }),
                CFString::new(&service).as_CFType(),
            ),
            (
                attr_key(unsafe { ffi::kSecMatchLimit }),
                attr_key(unsafe { ffi::kSecMatchLimitAll }).as_CFType(),
            ),
            (
                attr_key(unsafe { ffi::kSecReturnAttributes }),
                CFBoolean::true_value().as_CFType(),
            ),
            (
                attr_key(unsafe { ffi::kSecReturnData }),
                CFBoolean::true_value().as_CFType(),
            ),
        ]);

        let items = match copy_matching(&query)? {
            Some(items) if items.len() > 0 => items,
            _ => {
                return Err(StoreError::NamespaceNotFound {
                    namespace: namespace.to_string(),
                })
            }
        };

        let mut entries = Vec::new();
        for item in items.iter() {
            let key = match dict_string(&item, unsafe { ffi::kSecAttrAccount }) {
                Some(key) => key,
                None => {
                    warn!("skipping keychain item without an account attribute");
                    continue;
                }
            };
            let value = match dict_data(&item, unsafe { ffi::kSecValueData }) {
                Some(value) => value,
                None => {
                    warn!("skipping keychain item without secret data");
                    continue;
                }
            };
            entries.push(CredentialEntry {
                key: key.as_str().to_string(),
                value,
            });
        }
        Ok(entries)
    }

    fn save_value(
        &mut self,
        namespace: &str,
        key: &str,
        value: &[u8],
        policy: AccessPolicy,
    ) -> Result<()> {
        let service = service_name(namespace);
        let item = match self.find_item(namespace, key)? {
            Some(item) => item,
            None => {
                let mut raw: ffi::SecKeychainItemRef = ptr::null_mut();
                let status = unsafe {
                    ffi::SecKeychainAddGenericPassword(
                        self.keychain_ref(),
                        service.len() as u32,
                        service.as_ptr().cast(),
                        key.len() as u32,
                        key.as_ptr().cast(),
                        value.len() as u32,
                        value.as_ptr().cast(),
                        &mut raw,
                    )
                };
                check(status)?;
                KeychainItem(raw)
            }
        };

        // Replace the secret content and (re)write the description tag
        // that namespace enumeration recognizes.
        let mut description = ffi::SecKeychainAttribute {
            tag: ffi::DESCRIPTION_ITEM_ATTR,
            length: ITEM_DESCRIPTION.len() as u32,
            data: ITEM_DESCRIPTION.as_ptr() as *mut c_void,
        };
        let attributes = ffi::SecKeychainAttributeList {
            count: 1,
            attr: &mut description,
        };
        check(unsafe {
            ffi::SecKeychainItemModifyAttributesAndData(
                item.0,
                &attributes,
                value.len() as u32,
                value.as_ptr().cast(),
            )
        })?;

        if policy != AccessPolicy::Unspecified {
            self.apply_policy(&item, policy)?;
        }
        Ok(())
    }

    fn delete_value(&mut self, namespace: &str, key: &str) -> Result<()> {
        match self.find_item(namespace, key)? {
            Some(item) => check(unsafe { ffi::SecKeychainItemDelete(item.0) }),
            None => Ok(()),
        }
    }
}

fn service_name(namespace: &str) -> String {
    format!("{}{}", SERVICE_PREFIX, namespace)
}

/// Compute the prompt-selector bits an ACL rewrite should install.
fn rewritten_prompt_selector(current: u16, require_passphrase: bool) -> u16 {
    if require_passphrase {
        let base = if current == 0 {
            PROMPT_SELECTOR_SEED
        } else {
            current
        };
        base | PROMPT_REQUIRE_PASSPHRASE
    } else {
        0
    }
}

/// Resolve this binary to its canonical on-disk path and wrap it as the
/// sole trusted application. A wrong path here silently breaks future
/// silent access, so both resolution steps fail hard.
fn self_trusted_application() -> Result<CFType> {
    let exe = std::env::current_exe().map_err(|err| {
        StoreError::AccessControl(format!("failed to resolve own executable path: {}", err))
    })?;
    let exe = exe.canonicalize().map_err(|err| {
        StoreError::AccessControl(format!("failed to canonicalize executable path: {}", err))
    })?;
    let path = CString::new(exe.as_os_str().as_bytes()).map_err(|_| {
        StoreError::AccessControl("executable path contains a NUL byte".to_string())
    })?;

    let mut app: ffi::SecTrustedApplicationRef = ptr::null_mut();
    acl_check(unsafe { ffi::SecTrustedApplicationCreateFromPath(path.as_ptr(), &mut app) })?;
    Ok(unsafe { CFType::wrap_under_create_rule(app as CFTypeRef) })
}

/// Run an item query; `None` means nothing matched.
fn copy_matching(
    query: &CFDictionary<CFString, CFType>,
) -> Result<Option<CFArray<CFDictionary<CFString, CFType>>>> {
    let mut result: CFTypeRef = ptr::null();
    let status = unsafe { ffi::SecItemCopyMatching(query.as_concrete_TypeRef(), &mut result) };
    if status == ffi::errSecItemNotFound {
        return Ok(None);
    }
    check(status)?;
    let items = unsafe { CFArray::wrap_under_create_rule(result as CFArrayRef) };
    Ok(Some(items))
}

fn attr_key(raw: CFStringRef) -> CFString {
    unsafe { CFString::wrap_under_get_rule(raw) }
}

/// Copy a string attribute out of a result row. The copy is zeroized once
/// the caller is done with it.
fn dict_string(
    row: &CFDictionary<CFString, CFType>,
    key: CFStringRef,
) -> Option<Zeroizing<String>> {
    let value = row.find(&attr_key(key))?;
    let value = value.downcast::<CFString>()?;
    Some(Zeroizing::new(value.to_string()))
}

/// Copy the decrypted secret data out of a result row.
fn dict_data(row: &CFDictionary<CFString, CFType>, key: CFStringRef) -> Option<SecretBuffer> {
    let value = row.find(&attr_key(key))?;
    let value = value.downcast::<CFData>()?;
    Some(SecretBuffer::new(value.bytes().to_vec()))
}

fn status_message(status: ffi::OSStatus) -> String {
    security_framework::base::Error::from_code(status).to_string()
}

fn check(status: ffi::OSStatus) -> Result<()> {
    if status == ffi::errSecSuccess {
        Ok(())
    } else {
        Err(StoreError::Backend(status_message(status)))
    }
}

fn acl_check(status: ffi::OSStatus) -> Result<()> {
    if status == ffi::errSecSuccess {
        Ok(())
    } else {
        Err(StoreError::AccessControl(status_message(status)))
    }
}

/// Owned keychain item reference, released on drop.
struct KeychainItem(ffi::SecKeychainItemRef);

impl Drop for KeychainItem {
    fn drop(&mut self) {
        if !self.0.is_null() {
            unsafe { CFRelease(self.0 as CFTypeRef) };
        }
    }
}

/// Releases a raw Core Foundation reference on drop.
struct CfGuard(CFTypeRef);

impl Drop for CfGuard {
    fn drop(&mut self) {
        if !self.0.is_null() {
            unsafe { CFRelease(self.0) };
        }
    }
}

mod ffi {
    //! The parts of `Security.framework` the wrapper crates do not expose:
    //! legacy keychain item calls and ACL editing.

    #![allow(non_upper_case_globals, non_snake_case)]

    use std::os::raw::{c_char, c_void};

    use core_foundation_sys::array::CFArrayRef;
    use core_foundation_sys::base::CFTypeRef;
    use core_foundation_sys::dictionary::CFDictionaryRef;
    use core_foundation_sys::string::CFStringRef;

    pub type OSStatus = i32;
    pub type SecKeychainRef = *mut c_void;
    pub type SecKeychainItemRef = *mut c_void;
    pub type SecAccessRef = *mut c_void;
    pub type SecACLRef = *mut c_void;
    pub type SecTrustedApplicationRef = *mut c_void;
    pub type SecKeychainPromptSelector = u16;
    pub type SecKeychainAttrType = u32;

    pub const errSecSuccess: OSStatus = 0;
    pub const errSecItemNotFound: OSStatus = -25300;

    /// `kSecDescriptionItemAttr` ('desc').
    pub const DESCRIPTION_ITEM_ATTR: SecKeychainAttrType = 0x6465_7363;

    #[repr(C)]
    pub struct SecKeychainAttribute {
        pub tag: SecKeychainAttrType,
        pub length: u32,
        pub data: *mut c_void,
    }

    #[repr(C)]
    pub struct SecKeychainAttributeList {
        pub count: u32,
        pub attr: *mut SecKeychainAttribute,
    }

    #[link(name = "Security", kind = "framework")]
    extern "C" {
        pub static kSecClass: CFStringRef;
        pub static kSecClassGenericPassword: CFStringRef;
        pub static kSecAttrService: CFStringRef;
        pub static kSecAttrAccount: CFStringRef;
        pub static kSecAttrDescription: CFStringRef;
        pub static kSecMatchLimit: CFStringRef;
        pub static kSecMatchLimitAll: CFStringRef;
        pub static kSecReturnAttributes: CFStringRef;
        pub static kSecReturnData: CFStringRef;
        pub static kSecValueData: CFStringRef;
        pub static kSecACLAuthorizationDecrypt: CFStringRef;

        pub fn SecItemCopyMatching(query: CFDictionaryRef, result: *mut CFTypeRef) -> OSStatus;

        pub fn SecKeychainFindGenericPassword(
            keychain_or_array: CFTypeRef,
            service_name_length: u32,
            service_name: *const c_char,
            account_name_length: u32,
            account_name: *const c_char,
            password_length: *mut u32,
            password_data: *mut *mut c_void,
            item: *mut SecKeychainItemRef,
        ) -> OSStatus;

        pub fn SecKeychainAddGenericPassword(
            keychain: SecKeychainRef,
            service_name_length: u32,
            service_name: *const c_char,
            account_name_length: u32,
            account_name: *const c_char,
            password_length: u32,
            password_data: *const c_void,
            item: *mut SecKeychainItemRef,
        ) -> OSStatus;

        pub fn SecKeychainItemModifyAttributesAndData(
            item: SecKeychainItemRef,
            attr_list: *const SecKeychainAttributeList,
            length: u32,
            data: *const c_void,
        ) -> OSStatus;

        pub fn SecKeychainItemDelete(item: SecKeychainItemRef) -> OSStatus;

        pub fn SecKeychainItemCopyAccess(
            item: SecKeychainItemRef,
            access: *mut SecAccessRef,
        ) -> OSStatus;

        pub fn SecKeychainItemSetAccess(item: SecKeychainItemRef, access: SecAccessRef)
            -> OSStatus;

        pub fn SecAccessCopyMatchingACLList(
            access: SecAccessRef,
            authorization_tag: CFTypeRef,
        ) -> CFArrayRef;

        pub fn SecACLCopyContents(
            acl: SecACLRef,
            application_list: *mut CFArrayRef,
            description: *mut CFStringRef,
            prompt_selector: *mut SecKeychainPromptSelector,
        ) -> OSStatus;

        pub fn SecACLSetContents(
            acl: SecACLRef,
            application_list: CFArrayRef,
            description: CFStringRef,
            prompt_selector: SecKeychainPromptSelector,
        ) -> OSStatus;

        pub fn SecTrustedApplicationCreateFromPath(
            path: *const c_char,
            app: *mut SecTrustedApplicationRef,
        ) -> OSStatus;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_name_is_prefixed() {
        assert_eq!(service_name("aws"), "envkeep-aws");
        assert_eq!(service_name(""), "envkeep-");
    }

    #[test]
    fn test_require_passphrase_seeds_cleared_selector() {
        let selector = rewritten_prompt_selector(0, true);
        assert_eq!(selector, PROMPT_SELECTOR_SEED | PROMPT_REQUIRE_PASSPHRASE);
    }

    #[test]
    fn test_require_passphrase_preserves_existing_bits() {
        let selector = rewritten_prompt_selector(0x0040, true);
        assert_eq!(selector, 0x0040 | PROMPT_REQUIRE_PASSPHRASE);
    }

    #[test]
    fn test_no_passphrase_clears_every_bit() {
        assert_eq!(rewritten_prompt_selector(0x0141, false), 0);
        assert_eq!(rewritten_prompt_selector(0, false), 0);
    }
}
